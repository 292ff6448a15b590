pub mod classifier;
pub mod error;
pub mod indicator;

pub use classifier::extract_indicators;
pub use error::EngineError;
pub use indicator::{Candidate, IndicatorType, ThreatLevel};
