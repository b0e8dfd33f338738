//! The wiring shell (§2, §6): a `MemoryService` facade collecting the
//! per-crate operations (`codemem-db` writer, `codemem-search` retrieval,
//! `codemem-pack` builder) into the plain async functions an MCP bridge
//! would call, plus the daemon plumbing (`codemem-sync` scheduler,
//! `codemem-ingest` flusher/sweeper) a binary wires up at startup.
//!
//! Mirrors the role `claude-view-server` plays for claude-view: a thin
//! composition root, not a place where new domain logic lives.

pub mod config;
pub mod daemon;
pub mod expand;
pub mod service;

pub use config::ServerConfig;
pub use daemon::{DaemonHandle, NullClassifier};
pub use expand::ExpandOutcome;
pub use service::{LearnOutcome, MemoryService, MemorySchema};
