//! Shared types, error taxonomy, and ambient helpers for codemem crates.
//!
//! Mirrors the role `claude-view-core` plays for claude-view: every other
//! crate in the workspace depends on this one for the vocabulary it does not
//! own itself (memory kinds, cursors, filters, metadata coercion, paths).

pub mod cursor;
pub mod error;
pub mod filters;
pub mod kind;
pub mod memory_like;
pub mod metadata;
pub mod paths;

pub use cursor::Cursor;
pub use error::{CoreError, ToolError, ToolErrorCode};
pub use filters::MemoryFilters;
pub use kind::{kind_bonus, normalize_kind, MemoryKind, ALLOWED_MEMORY_KINDS};
pub use memory_like::MemoryLike;
pub use metadata::Metadata;
pub use paths::RawEventsConfig;

/// Recency window (days) used by the retrieval engine's decay function.
pub const RECALL_RECENCY_DAYS: f64 = 21.0;

/// Recency window (days) used for the task-biased recall path.
pub const TASK_RECENCY_DAYS: f64 = 7.0;
