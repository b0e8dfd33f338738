//! Peer registry storage (§3 "Peer", §4.8). The scheduler and sync
//! transport logic live in `codemem-sync`; this module owns the row shape
//! and the bounded attempt history.

use crate::{Database, DbResult};
use chrono::Utc;
use serde_json::Value;

/// Bounded history kept per peer — §3 "sync_attempts (bounded history)".
pub const MAX_SYNC_ATTEMPTS: i64 = 10;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Peer {
    pub peer_device_id: String,
    pub pinned_fingerprint: String,
    pub public_key: String,
    #[sqlx(json)]
    pub known_addresses: Value,
    pub last_success_at: Option<String>,
    pub last_success_address: Option<String>,
    pub last_applied_cursor: Option<String>,
    pub last_acked_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SyncAttempt {
    pub id: i64,
    pub peer_device_id: String,
    pub started_at: String,
    pub ok: bool,
    pub error: Option<String>,
    pub ops_in: i64,
    pub ops_out: i64,
}

impl Database {
    /// Register (or update the identity of) a peer. `known_addresses` is
    /// left untouched on conflict — address management goes through
    /// `add_known_address`.
    pub async fn upsert_peer(
        &self,
        peer_device_id: &str,
        pinned_fingerprint: &str,
        public_key: &str,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO peers (peer_device_id, pinned_fingerprint, public_key, known_addresses)
            VALUES (?1, ?2, ?3, '[]')
            ON CONFLICT(peer_device_id) DO UPDATE SET
                pinned_fingerprint = excluded.pinned_fingerprint,
                public_key = excluded.public_key
            "#,
        )
        .bind(peer_device_id)
        .bind(pinned_fingerprint)
        .bind(public_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_peer(&self, peer_device_id: &str) -> DbResult<Option<Peer>> {
        let row = sqlx::query_as::<_, Peer>("SELECT * FROM peers WHERE peer_device_id = ?1")
            .bind(peer_device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_peers(&self) -> DbResult<Vec<Peer>> {
        let rows = sqlx::query_as::<_, Peer>("SELECT * FROM peers ORDER BY peer_device_id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Merge `addresses` into the peer's known address set, deduplicated,
    /// preserving the existing relative order and appending new ones —
    /// "mDNS entries refresh the stored set" (§4.8).
    pub async fn merge_known_addresses(&self, peer_device_id: &str, addresses: &[String]) -> DbResult<()> {
        let Some(peer) = self.get_peer(peer_device_id).await? else { return Ok(()) };
        let mut existing: Vec<String> = peer
            .known_addresses
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        for addr in addresses {
            if !existing.contains(addr) {
                existing.push(addr.clone());
            }
        }
        let json = serde_json::to_string(&existing).unwrap_or_else(|_| "[]".to_string());
        sqlx::query("UPDATE peers SET known_addresses = ?1 WHERE peer_device_id = ?2")
            .bind(&json)
            .bind(peer_device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of one sync attempt and, on success, advance
    /// `last_success_at`/`last_success_address` (§4.8 "dial order prefers
    /// the last-successful address").
    pub async fn record_sync_attempt(
        &self,
        peer_device_id: &str,
        ok: bool,
        error: Option<&str>,
        ops_in: i64,
        ops_out: i64,
        address: Option<&str>,
    ) -> DbResult<()> {
        let started_at = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO peer_sync_attempts (peer_device_id, started_at, ok, error, ops_in, ops_out)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(peer_device_id)
        .bind(&started_at)
        .bind(ok)
        .bind(error)
        .bind(ops_in)
        .bind(ops_out)
        .execute(&self.pool)
        .await?;

        if ok {
            sqlx::query(
                "UPDATE peers SET last_success_at = ?1, last_success_address = COALESCE(?2, last_success_address) WHERE peer_device_id = ?3",
            )
            .bind(&started_at)
            .bind(address)
            .bind(peer_device_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// The up-to-`MAX_SYNC_ATTEMPTS` most recent attempts, newest first —
    /// the window the backoff formula inspects.
    pub async fn recent_sync_attempts(&self, peer_device_id: &str) -> DbResult<Vec<SyncAttempt>> {
        let rows = sqlx::query_as::<_, SyncAttempt>(
            "SELECT * FROM peer_sync_attempts WHERE peer_device_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
        )
        .bind(peer_device_id)
        .bind(MAX_SYNC_ATTEMPTS)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_replication_cursors(
        &self,
        peer_device_id: &str,
        last_applied: Option<&str>,
        last_acked: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE peers SET last_applied_cursor = COALESCE(?1, last_applied_cursor), last_acked_cursor = COALESCE(?2, last_acked_cursor) WHERE peer_device_id = ?3",
        )
        .bind(last_applied)
        .bind(last_acked)
        .bind(peer_device_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_fetch_round_trips() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_peer("peer-1", "fp-1", "pubkey-1").await.unwrap();
        let peer = db.get_peer("peer-1").await.unwrap().unwrap();
        assert_eq!(peer.pinned_fingerprint, "fp-1");
        assert_eq!(peer.known_addresses, Value::Array(vec![]));
    }

    #[tokio::test]
    async fn merge_known_addresses_dedupes_and_preserves_order() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_peer("peer-1", "fp-1", "pubkey-1").await.unwrap();
        db.merge_known_addresses("peer-1", &["10.0.0.1:1".into(), "10.0.0.2:2".into()]).await.unwrap();
        db.merge_known_addresses("peer-1", &["10.0.0.2:2".into(), "10.0.0.3:3".into()]).await.unwrap();
        let peer = db.get_peer("peer-1").await.unwrap().unwrap();
        let addrs: Vec<String> =
            peer.known_addresses.as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(addrs, vec!["10.0.0.1:1", "10.0.0.2:2", "10.0.0.3:3"]);
    }

    #[tokio::test]
    async fn records_attempts_bounded_and_updates_last_success_on_ok() {
        let db = Database::new_in_memory().await.unwrap();
        db.upsert_peer("peer-1", "fp-1", "pubkey-1").await.unwrap();
        for i in 0..3 {
            db.record_sync_attempt("peer-1", i != 1, Some("connection refused"), 0, 0, Some("10.0.0.1:1"))
                .await
                .unwrap();
        }
        let attempts = db.recent_sync_attempts("peer-1").await.unwrap();
        assert_eq!(attempts.len(), 3);
        let peer = db.get_peer("peer-1").await.unwrap().unwrap();
        assert!(peer.last_success_at.is_some());
    }
}
