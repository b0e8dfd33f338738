//! Daemon tick (§4.8): iterate peers sequentially, skip those under
//! connectivity backoff, otherwise union stored + discovered addresses and
//! run one exchange, recording the attempt either way.

use codemem_db::Database;

use crate::backoff::backoff_remaining;
use crate::client::sync_with_peer;
use crate::discovery::{union_addresses, PeerDiscovery};
use crate::identity::DeviceIdentity;
use crate::wire::MAX_SYNC_BODY_BYTES;
use crate::SyncResult;

/// Outcome of one tick, across all peers — surfaced for logging/tests, not
/// part of the wire protocol.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub synced: Vec<String>,
    pub skipped_backoff: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Run one daemon tick. There is no cross-peer parallelism — peers are
/// processed sequentially, matching §5's "no cross-peer parallelism".
pub async fn run_daemon_tick(
    db: &Database,
    identity: &DeviceIdentity,
    discovery: &dyn PeerDiscovery,
    http: &reqwest::Client,
) -> SyncResult<TickOutcome> {
    let peers = db.list_peers().await?;
    let now = chrono::Utc::now();
    let mut outcome = TickOutcome::default();

    for peer in peers {
        let attempts = db.recent_sync_attempts(&peer.peer_device_id).await?;
        if backoff_remaining(&attempts, now).is_some() {
            outcome.skipped_backoff.push(peer.peer_device_id.clone());
            continue;
        }

        let discovered = discovery.discover(&peer.peer_device_id);
        if !discovered.is_empty() {
            let urls: Vec<String> = discovered.iter().map(|a| a.url.clone()).collect();
            db.merge_known_addresses(&peer.peer_device_id, &urls).await?;
        }

        let stored: Vec<String> = peer
            .known_addresses
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let mut addresses = union_addresses(&stored, &discovered);
        prefer_last_successful(&mut addresses, peer.last_success_address.as_deref());

        match sync_with_peer(db, identity, http, &peer, &addresses, MAX_SYNC_BODY_BYTES).await {
            Ok(summary) => {
                db.record_sync_attempt(
                    &peer.peer_device_id,
                    true,
                    None,
                    summary.ops_in as i64,
                    summary.ops_out as i64,
                    Some(&summary.address),
                )
                .await?;
                outcome.synced.push(peer.peer_device_id.clone());
            }
            Err(e) => {
                db.record_sync_attempt(&peer.peer_device_id, false, Some(&e.to_string()), 0, 0, None)
                    .await?;
                outcome.failed.push((peer.peer_device_id.clone(), e.to_string()));
            }
        }
    }

    Ok(outcome)
}

/// Move `preferred` to the front of `addresses` if present — §4.8 "dial
/// order prefers the last-successful address".
fn prefer_last_successful(addresses: &mut Vec<String>, preferred: Option<&str>) {
    let Some(preferred) = preferred else { return };
    if let Some(pos) = addresses.iter().position(|a| a == preferred) {
        let addr = addresses.remove(pos);
        addresses.insert(0, addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefer_last_successful_moves_it_to_front() {
        let mut addresses =
            vec!["a".to_string(), "b".to_string(), "c".to_string()];
        prefer_last_successful(&mut addresses, Some("c"));
        assert_eq!(addresses, vec!["c", "a", "b"]);
    }

    #[test]
    fn prefer_last_successful_is_a_no_op_when_absent() {
        let mut addresses = vec!["a".to_string(), "b".to_string()];
        prefer_last_successful(&mut addresses, Some("z"));
        assert_eq!(addresses, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn skips_peers_under_backoff() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_peer("peer-1", "fp-1", "pubkey-1").await.unwrap();
        for _ in 0..2 {
            db.record_sync_attempt("peer-1", false, Some("connection refused"), 0, 0, None)
                .await
                .unwrap();
        }

        let keys_dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(keys_dir.path()).unwrap();
        let http = reqwest::Client::new();
        let outcome =
            run_daemon_tick(&db, &identity, &crate::discovery::NullDiscovery, &http).await.unwrap();
        assert_eq!(outcome.skipped_backoff, vec!["peer-1".to_string()]);
        assert!(outcome.synced.is_empty());
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn records_failure_when_peer_has_no_addresses() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_peer("peer-1", "fp-1", "pubkey-1").await.unwrap();

        let keys_dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(keys_dir.path()).unwrap();
        let http = reqwest::Client::new();
        let outcome =
            run_daemon_tick(&db, &identity, &crate::discovery::NullDiscovery, &http).await.unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "peer-1");
    }
}
