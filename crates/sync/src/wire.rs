//! The bit-exact wire protocol (§4.7): `/v1/status`, `/v1/ops` GET/POST.

use codemem_db::ReplicationOp;
use serde::{Deserialize, Serialize};

/// Requests larger than this are rejected with `413 payload_too_large`,
/// prompting the client to binary-split and retry.
pub const MAX_SYNC_BODY_BYTES: usize = 1024 * 1024;

/// A cap on ops accepted per POST regardless of byte size — guards against
/// a well-formed-but-absurd single giant op list; triggers `413
/// too_many_ops` the same way an oversized body does.
pub const MAX_OPS_PER_BATCH: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub device_id: String,
    pub fingerprint: String,
}

/// One op as it crosses the wire, in both directions: the server serializes
/// these out of `GET /v1/ops`, and the client serializes them into
/// `POST /v1/ops`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOp {
    pub op_id: String,
    pub created_at: String,
    pub origin_device_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub op_type: String,
    pub payload: serde_json::Value,
}

impl From<&ReplicationOp> for WireOp {
    fn from(op: &ReplicationOp) -> Self {
        Self {
            op_id: op.op_id.clone(),
            created_at: op.created_at.clone(),
            origin_device_id: op.origin_device_id.clone(),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            op_type: op.op_type.as_str().to_string(),
            payload: op.payload.clone(),
        }
    }
}

impl WireOp {
    pub fn into_replication_op(self) -> Option<ReplicationOp> {
        let op_type = codemem_db::ReplicationOpType::parse(&self.op_type)?;
        Some(ReplicationOp {
            op_id: self.op_id,
            created_at: self.created_at,
            origin_device_id: self.origin_device_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            op_type,
            payload: self.payload,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsResponse {
    pub ops: Vec<WireOp>,
    pub next_cursor: Option<String>,
    pub skipped: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpsQuery {
    pub since: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOpsRequest {
    pub ops: Vec<WireOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOpsResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { error: error.into(), reason: Some(reason.into()) }
    }

    pub fn simple(error: impl Into<String>) -> Self {
        Self { error: error.into(), reason: None }
    }
}
