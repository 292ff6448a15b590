//! IOC correlation engine server library.
//!
//! Exposes the storage layer, correlation pipeline and router for
//! in-process testing.

pub mod api;
pub mod correlate;
pub mod db;

pub use api::{build_router, AppState, SharedState};
pub use correlate::{assemble_candidates, delete_evidence_with_recount, process_candidates};
pub use db::{
    AuditEntry, Database, EnrichedObservable, EvidenceFile, RelatedCase, StoredCase,
    StoredEvidence, StoredObservable,
};
