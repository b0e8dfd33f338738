//! The raw-event ingestion pipeline (C9, §4.9): deduplicated append of raw
//! tool/session events (storage lives in `codemem-db`), the debounced
//! per-session flusher, and the idle sweeper that drains pending events
//! through an external classifier into memory items.
//!
//! Mirrors the role `claude-view-relay`'s event ingestion plays for
//! claude-view, generalized to this system's classifier boundary instead of
//! a fixed event schema.

pub mod classifier;
pub mod flush;
pub mod gate;
pub mod sweeper;

pub use classifier::{Classifier, ClassifiedMemory, ClassifierError, FlushContext};
pub use flush::{flush_session, AutoFlusher, FlushOutcome};
pub use gate::{evaluate_gate, GateReport, GateThresholds, GateViolation};
pub use sweeper::{Sweeper, SweepOutcome};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Db(#[from] codemem_db::DbError),

    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

pub type IngestResult<T> = Result<T, IngestError>;
