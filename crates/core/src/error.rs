//! Error taxonomy (§7). `CoreError` covers ambient failures owned by this
//! crate; `ToolError`/`ToolErrorCode` is the facade-level structured outcome
//! every public tool operation reports alongside partial results, matching
//! §7's "local recoverable errors are returned in a structured `errors`
//! field next to partial results."

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to determine home/cache directory")]
    NoHomeDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The closed set of tagged outcomes from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    InvalidArgument,
    NotFound,
    ProjectMismatch,
    PeerUntrusted,
    FingerprintMismatch,
    Connectivity,
    Protocol,
    ClassifierAuth,
    Integrity,
}

impl ToolErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ToolErrorCode::NotFound => "NOT_FOUND",
            ToolErrorCode::ProjectMismatch => "PROJECT_MISMATCH",
            ToolErrorCode::PeerUntrusted => "PEER_UNTRUSTED",
            ToolErrorCode::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            ToolErrorCode::Connectivity => "CONNECTIVITY",
            ToolErrorCode::Protocol => "PROTOCOL",
            ToolErrorCode::ClassifierAuth => "CLASSIFIER_AUTH",
            ToolErrorCode::Integrity => "INTEGRITY",
        }
    }
}

/// One reported, non-fatal outcome for a single failing input (or a batch
/// of inputs sharing a code), as surfaced by `expand`/`get_many`/etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    /// The offending input values (stringified ids, etc.), in the order
    /// they were encountered.
    pub ids: Vec<String>,
}

impl ToolError {
    pub fn new(code: ToolErrorCode, ids: Vec<String>) -> Self {
        Self { code, ids }
    }
}
