//! Sync HTTP server (§4.7): signed `/v1/status` and `/v1/ops` endpoints,
//! mirroring the shape of the teacher's `relay::app` router but serving a
//! point-to-point protocol between already-paired peers instead of a
//! fan-out relay.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use codemem_db::{filter_replication_ops_for_sync, Database};
use ed25519_dalek::VerifyingKey;
use tower_http::trace::TraceLayer;

use crate::auth::{self, SignedHeaders, HEADER_DEVICE, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::identity::DeviceIdentity;
use crate::wire::{
    ErrorResponse, OpsQuery, OpsResponse, PostOpsRequest, PostOpsResponse, StatusResponse, WireOp,
    MAX_OPS_PER_BATCH, MAX_SYNC_BODY_BYTES,
};

/// Shared state for the sync server: the local persistence handle and this
/// node's signing identity.
#[derive(Clone)]
pub struct SyncState {
    pub db: Arc<Database>,
    pub identity: Arc<DeviceIdentity>,
}

pub fn sync_app(state: SyncState) -> Router {
    Router::new()
        .route("/v1/status", get(status_handler))
        .route("/v1/ops", get(ops_get_handler).post(ops_post_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

enum ApiError {
    Unauthorized(String),
    PayloadTooLarge(&'static str),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(reason) => {
                (StatusCode::UNAUTHORIZED, ErrorResponse::new("unauthorized", reason))
            }
            ApiError::PayloadTooLarge(kind) => {
                (StatusCode::PAYLOAD_TOO_LARGE, ErrorResponse::simple(kind))
            }
            ApiError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, ErrorResponse::new("bad_request", reason))
            }
            ApiError::Internal(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("internal", reason))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn extract_signed_headers(headers: &HeaderMap) -> Result<SignedHeaders, ApiError> {
    let device_id = headers
        .get(HEADER_DEVICE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing device header".to_string()))?
        .to_string();
    let timestamp: u64 = headers
        .get(HEADER_TIMESTAMP)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing or malformed timestamp header".to_string()))?;
    let signature_b64 = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing signature header".to_string()))?
        .to_string();
    Ok(SignedHeaders { device_id, timestamp, signature_b64 })
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|p| p.as_str()).unwrap_or_else(|| uri.path())
}

/// Verify the request's signature against the claimed device's pinned
/// public key. Only devices already present in the peer registry (paired
/// out-of-band) authenticate — there is no trust-on-first-use here; an
/// unknown `device_id` is rejected outright (§4.7 "rejects unknown
/// device_ids").
async fn authenticate(
    db: &Database,
    headers: &HeaderMap,
    method: &str,
    url: &str,
    body: &[u8],
) -> Result<String, ApiError> {
    let signed = extract_signed_headers(headers)?;
    let peer = db
        .get_peer(&signed.device_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown device {}", signed.device_id)))?;

    let key_bytes: [u8; 32] = hex::decode(&peer.public_key)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ApiError::Unauthorized("malformed stored public key".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| ApiError::Unauthorized("malformed stored public key".to_string()))?;

    auth::verify_request(&signed, &verifying_key, method, url, body)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    Ok(signed.device_id)
}

async fn status_handler(
    State(state): State<SyncState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<StatusResponse>, ApiError> {
    authenticate(&state.db, &headers, "GET", path_and_query(&uri), b"").await?;
    Ok(Json(StatusResponse {
        device_id: state.identity.device_id.clone(),
        fingerprint: state.identity.device_id.clone(),
    }))
}

async fn ops_get_handler(
    State(state): State<SyncState>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<OpsQuery>,
) -> Result<Json<OpsResponse>, ApiError> {
    let peer_device_id =
        authenticate(&state.db, &headers, "GET", path_and_query(&uri), b"").await?;

    let limit = query.limit.unwrap_or(500).clamp(1, MAX_OPS_PER_BATCH as i64);
    let ops = state
        .db
        .load_replication_ops_since(query.since.as_deref(), limit, None)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (retained, trailing_cursor) = filter_replication_ops_for_sync(&ops, &peer_device_id);
    let skipped = (ops.len() - retained.len()) as u64;

    Ok(Json(OpsResponse {
        ops: retained.iter().map(WireOp::from).collect(),
        next_cursor: trailing_cursor.map(|c| c.as_str().to_string()),
        skipped,
    }))
}

async fn ops_post_handler(
    State(state): State<SyncState>,
    headers: HeaderMap,
    uri: Uri,
    body: axum::body::Bytes,
) -> Result<Json<PostOpsResponse>, ApiError> {
    if body.len() > MAX_SYNC_BODY_BYTES {
        return Err(ApiError::PayloadTooLarge("payload_too_large"));
    }

    let peer_device_id =
        authenticate(&state.db, &headers, "POST", path_and_query(&uri), &body).await?;

    let request: PostOpsRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid json: {e}")))?;
    if request.ops.len() > MAX_OPS_PER_BATCH {
        return Err(ApiError::PayloadTooLarge("too_many_ops"));
    }

    let mut ops = Vec::with_capacity(request.ops.len());
    for wire_op in request.ops {
        let op = wire_op
            .into_replication_op()
            .ok_or_else(|| ApiError::BadRequest("unparseable op_type".to_string()))?;
        ops.push(op);
    }

    state
        .db
        .apply_replication_ops(&ops, &peer_device_id, Utc::now())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(PostOpsResponse {}))
}
