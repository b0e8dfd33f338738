//! Replication protocol, signed HTTP transport, and the peer
//! registry/scheduler (C6 protocol side, C7, C8).
//!
//! Mirrors the role `claude-view-relay` plays for claude-view: signed
//! request auth, a small axum server, and a background daemon tick — but
//! point-to-point between trusted peers instead of through a central relay.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod discovery;
pub mod identity;
pub mod scheduler;
pub mod server;
pub mod wire;

pub use discovery::{NullDiscovery, PeerAddress, PeerDiscovery};
pub use identity::DeviceIdentity;
pub use scheduler::{run_daemon_tick, TickOutcome};
pub use server::{sync_app, SyncState};
pub use wire::MAX_SYNC_BODY_BYTES;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Db(#[from] codemem_db::DbError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("peer {0} has no pinned fingerprint on record")]
    NoPinnedFingerprint(String),

    #[error("peer fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unparseable address: {0}")]
    BadAddress(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("all addresses failed | {0}")]
    AllAddressesFailed(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
