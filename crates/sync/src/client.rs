//! Client exchange algorithm (§4.7): status probe, pull, push, against one
//! peer's address list in order, stopping at the first address that
//! completes the whole exchange.

use chrono::Utc;
use codemem_db::{filter_replication_ops_for_sync, Database, Peer, ReplicationOp};
use reqwest::StatusCode;

use crate::auth::{sign_request, HEADER_DEVICE, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::identity::DeviceIdentity;
use crate::wire::{ErrorResponse, OpsResponse, PostOpsRequest, StatusResponse, WireOp};
use crate::{SyncError, SyncResult};

/// Ops pulled/pushed per page within one address attempt.
const DEFAULT_PAGE_LIMIT: i64 = 500;

/// Summary of one successful exchange, fed into `record_sync_attempt`.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub address: String,
    pub ops_in: u64,
    pub ops_out: u64,
}

/// Run the full exchange against `peer`, trying `addresses` in order and
/// stopping at the first that completes end to end. `peer.pinned_fingerprint`
/// must already be set — pairing happens elsewhere.
pub async fn sync_with_peer(
    db: &Database,
    identity: &DeviceIdentity,
    http: &reqwest::Client,
    peer: &Peer,
    addresses: &[String],
    max_body_bytes: usize,
) -> SyncResult<SyncSummary> {
    if peer.pinned_fingerprint.is_empty() {
        return Err(SyncError::NoPinnedFingerprint(peer.peer_device_id.clone()));
    }
    if addresses.is_empty() {
        return Err(SyncError::AllAddressesFailed("no known addresses".to_string()));
    }

    let mut errors = Vec::new();
    for address in addresses {
        match try_address(db, identity, http, peer, address, max_body_bytes).await {
            Ok(summary) => return Ok(summary),
            Err(e) => errors.push(format!("{address}: {e}")),
        }
    }
    Err(SyncError::AllAddressesFailed(errors.join(" || ")))
}

fn normalize_base_url(address: &str) -> SyncResult<String> {
    let url = reqwest::Url::parse(address).map_err(|_| SyncError::BadAddress(address.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SyncError::BadAddress(address.to_string()));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

async fn signed_get(
    http: &reqwest::Client,
    identity: &DeviceIdentity,
    base: &str,
    path_and_query: &str,
) -> SyncResult<reqwest::Response> {
    let signed = sign_request(identity, "GET", path_and_query, b"");
    let response = http
        .get(format!("{base}{path_and_query}"))
        .header(HEADER_DEVICE, &signed.device_id)
        .header(HEADER_TIMESTAMP, signed.timestamp.to_string())
        .header(HEADER_SIGNATURE, &signed.signature_b64)
        .send()
        .await?;
    Ok(response)
}

async fn signed_post(
    http: &reqwest::Client,
    identity: &DeviceIdentity,
    base: &str,
    path: &str,
    body: &[u8],
) -> SyncResult<reqwest::Response> {
    let signed = sign_request(identity, "POST", path, body);
    let response = http
        .post(format!("{base}{path}"))
        .header(HEADER_DEVICE, &signed.device_id)
        .header(HEADER_TIMESTAMP, signed.timestamp.to_string())
        .header(HEADER_SIGNATURE, &signed.signature_b64)
        .header("content-type", "application/json")
        .body(body.to_vec())
        .send()
        .await?;
    Ok(response)
}

async fn try_address(
    db: &Database,
    identity: &DeviceIdentity,
    http: &reqwest::Client,
    peer: &Peer,
    address: &str,
    max_body_bytes: usize,
) -> SyncResult<SyncSummary> {
    let base = normalize_base_url(address)?;

    let status_response = signed_get(http, identity, &base, "/v1/status").await?;
    if !status_response.status().is_success() {
        return Err(protocol_error(status_response).await);
    }
    let status: StatusResponse = status_response.json().await?;
    if status.fingerprint != peer.pinned_fingerprint {
        return Err(SyncError::FingerprintMismatch {
            expected: peer.pinned_fingerprint.clone(),
            actual: status.fingerprint,
        });
    }

    let ops_in = pull(db, identity, http, peer, &base).await?;
    let ops_out = push(db, identity, http, peer, &base, max_body_bytes).await?;

    Ok(SyncSummary { address: base, ops_in, ops_out })
}

/// Pull ops since `last_applied` in pages, applying as we go. Advances on
/// the server's `next_cursor` rather than the last applied op's own cursor,
/// so a page that is entirely peer-origin (`skipped>0`, `ops` empty) still
/// moves the cursor forward instead of looping forever (§4.7).
async fn pull(
    db: &Database,
    identity: &DeviceIdentity,
    http: &reqwest::Client,
    peer: &Peer,
    base: &str,
) -> SyncResult<u64> {
    let mut cursor = peer.last_applied_cursor.clone();
    let mut total = 0u64;

    loop {
        let query = match &cursor {
            Some(c) => format!("/v1/ops?since={}&limit={DEFAULT_PAGE_LIMIT}", urlencode(c)),
            None => format!("/v1/ops?limit={DEFAULT_PAGE_LIMIT}"),
        };
        let response = signed_get(http, identity, base, &query).await?;
        if !response.status().is_success() {
            return Err(protocol_error(response).await);
        }
        let page: OpsResponse = response.json().await?;

        if !page.ops.is_empty() {
            let replication_ops: Vec<ReplicationOp> =
                page.ops.into_iter().filter_map(WireOp::into_replication_op).collect();
            total += replication_ops.len() as u64;
            db.apply_replication_ops(&replication_ops, &peer.peer_device_id, Utc::now()).await?;
        }

        let made_progress = matches!(&page.next_cursor, Some(next) if Some(next) != cursor.as_ref());
        if let Some(next) = page.next_cursor {
            cursor = Some(next);
        }
        db.update_replication_cursors(&peer.peer_device_id, cursor.as_deref(), None).await?;

        if !made_progress {
            break;
        }
    }

    Ok(total)
}

/// Compute the effective outbound cursor, load this node's own ops since
/// it, filter out anything that originated at the peer (loop prevention),
/// and push in byte-budgeted chunks, splitting on `413`.
async fn push(
    db: &Database,
    identity: &DeviceIdentity,
    http: &reqwest::Client,
    peer: &Peer,
    base: &str,
    max_body_bytes: usize,
) -> SyncResult<u64> {
    let effective =
        db.normalize_outbound_cursor(peer.last_acked_cursor.as_deref(), &identity.device_id).await?;
    let outbound =
        db.load_replication_ops_since(effective.as_deref(), i64::MAX, Some(&identity.device_id)).await?;
    let (retained, _) = filter_replication_ops_for_sync(&outbound, &peer.peer_device_id);

    if retained.is_empty() {
        return Ok(0);
    }

    let mut last_acked = effective;
    let mut pushed = 0u64;
    let mut remaining: &[ReplicationOp] = &retained;

    while !remaining.is_empty() {
        let chunk_size = largest_chunk_under_budget(remaining, max_body_bytes);
        let (chunk, rest) = remaining.split_at(chunk_size);
        post_chunk(http, identity, base, chunk, max_body_bytes).await?;
        last_acked = chunk.last().map(|op| op.cursor().as_str().to_string()).or(last_acked);
        pushed += chunk.len() as u64;
        remaining = rest;
    }

    db.update_replication_cursors(&peer.peer_device_id, None, last_acked.as_deref()).await?;
    Ok(pushed)
}

fn chunk_body(ops: &[ReplicationOp]) -> SyncResult<Vec<u8>> {
    let request = PostOpsRequest { ops: ops.iter().map(WireOp::from).collect() };
    serde_json::to_vec(&request).map_err(|e| SyncError::Protocol(e.to_string()))
}

/// The biggest prefix of `ops` whose serialized body fits `max_body_bytes`,
/// at least one op (an over-budget single op is still sent — there is
/// nothing smaller to split it into).
fn largest_chunk_under_budget(ops: &[ReplicationOp], max_body_bytes: usize) -> usize {
    let mut size = ops.len().min(MAX_OPS_PER_CHUNK);
    while size > 1 {
        if let Ok(body) = chunk_body(&ops[..size]) {
            if body.len() <= max_body_bytes {
                break;
            }
        }
        size /= 2;
    }
    size.max(1)
}

const MAX_OPS_PER_CHUNK: usize = crate::wire::MAX_OPS_PER_BATCH;

/// POST one chunk, recursively binary-splitting on `413`.
async fn post_chunk(
    http: &reqwest::Client,
    identity: &DeviceIdentity,
    base: &str,
    ops: &[ReplicationOp],
    max_body_bytes: usize,
) -> SyncResult<()> {
    if ops.is_empty() {
        return Ok(());
    }
    let body = chunk_body(ops)?;
    let response = signed_post(http, identity, base, "/v1/ops", &body).await?;

    if response.status().is_success() {
        return Ok(());
    }

    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && ops.len() > 1 {
        let mid = ops.len() / 2;
        Box::pin(post_chunk(http, identity, base, &ops[..mid], max_body_bytes)).await?;
        Box::pin(post_chunk(http, identity, base, &ops[mid..], max_body_bytes)).await?;
        return Ok(());
    }

    Err(protocol_error(response).await)
}

async fn protocol_error(response: reqwest::Response) -> SyncError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => SyncError::Protocol(format!(
            "{status}: {}{}",
            body.error,
            body.reason.map(|r| format!(" ({r})")).unwrap_or_default()
        )),
        Err(_) => SyncError::Protocol(status.to_string()),
    }
}

fn urlencode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash() {
        assert_eq!(normalize_base_url("https://host:9876/").unwrap(), "https://host:9876");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(normalize_base_url("ftp://host").is_err());
    }

    #[test]
    fn urlencode_escapes_cursor_separator_and_colon() {
        assert_eq!(urlencode("2026-01-01T00:00:00+00:00|abc"), "2026-01-01T00%3A00%3A00%2B00%3A00%7Cabc");
    }

    #[test]
    fn urlencode_leaves_unreserved_characters_alone() {
        assert_eq!(urlencode("abc-123_XYZ.~"), "abc-123_XYZ.~");
    }
}
