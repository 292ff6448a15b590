use thiserror::Error;

/// Errors surfaced by the correlation engine.
///
/// Only persistence faults abort an ingestion; classification never fails
/// and empty candidates are silently skipped upstream.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl EngineError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        EngineError::Storage(err.to_string())
    }
}
