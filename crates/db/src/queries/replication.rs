//! The append-only replication log (§4.6, §3 "Replication op"). Every
//! mutation to a replicated entity appends one op inside the same
//! transaction as the row mutation, so partial commit is impossible.

use crate::{Database, DbResult};
use chrono::{DateTime, Utc};
use codemem_core::Cursor;
use serde_json::{json, Value};
use sqlx::{Sqlite, Transaction};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum ReplicationOpType {
    Upsert,
    Delete,
}

impl ReplicationOpType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplicationOpType::Upsert => "upsert",
            ReplicationOpType::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(ReplicationOpType::Upsert),
            "delete" => Some(ReplicationOpType::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationOp {
    pub op_id: String,
    pub created_at: String,
    pub origin_device_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub op_type: ReplicationOpType,
    pub payload: Value,
}

impl ReplicationOp {
    pub fn cursor(&self) -> Cursor {
        Cursor::compute(&self.created_at, &self.op_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Append one op within an already-open transaction. Callers (memory item
/// writer, session lifecycle) invoke this alongside their own row mutation
/// so both commit or neither does.
pub(crate) async fn append_op_tx(
    tx: &mut Transaction<'_, Sqlite>,
    origin_device_id: &str,
    entity_type: &str,
    entity_id: &str,
    op_type: ReplicationOpType,
    payload: &Value,
) -> DbResult<ReplicationOp> {
    let op_id = Ulid::new().to_string();
    let created_at = Utc::now().to_rfc3339();
    let payload_json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        r#"
        INSERT INTO replication_ops (op_id, created_at, origin_device_id, entity_type, entity_id, op_type, payload)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&op_id)
    .bind(&created_at)
    .bind(origin_device_id)
    .bind(entity_type)
    .bind(entity_id)
    .bind(op_type.as_str())
    .bind(&payload_json)
    .execute(&mut **tx)
    .await?;

    Ok(ReplicationOp {
        op_id,
        created_at,
        origin_device_id: origin_device_id.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        op_type,
        payload: payload.clone(),
    })
}

impl Database {
    /// Ops strictly greater than `cursor` in `(created_at, op_id)` order,
    /// filtered to `device_id`'s own writes when supplied.
    pub async fn load_replication_ops_since(
        &self,
        cursor: Option<&str>,
        limit: i64,
        device_id: Option<&str>,
    ) -> DbResult<Vec<ReplicationOp>> {
        let (created_at, op_id) = match cursor.and_then(Cursor::parse) {
            Some(c) => {
                let raw = c.as_str().to_string();
                let (a, b) = raw.split_once('|').expect("cursor always contains |");
                (a.to_string(), b.to_string())
            }
            None => (String::new(), String::new()),
        };

        let rows: Vec<(String, String, String, String, String, String, String)> = if let Some(
            device_id,
        ) = device_id
        {
            sqlx::query_as(
                r#"
                SELECT op_id, created_at, origin_device_id, entity_type, entity_id, op_type, payload
                FROM replication_ops
                WHERE (created_at > ?1 OR (created_at = ?1 AND op_id > ?2))
                  AND origin_device_id = ?3
                ORDER BY created_at ASC, op_id ASC
                LIMIT ?4
                "#,
            )
            .bind(&created_at)
            .bind(&op_id)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT op_id, created_at, origin_device_id, entity_type, entity_id, op_type, payload
                FROM replication_ops
                WHERE (created_at > ?1 OR (created_at = ?1 AND op_id > ?2))
                ORDER BY created_at ASC, op_id ASC
                LIMIT ?3
                "#,
            )
            .bind(&created_at)
            .bind(&op_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|(op_id, created_at, origin_device_id, entity_type, entity_id, op_type, payload)| {
                ReplicationOp {
                    op_id,
                    created_at,
                    origin_device_id,
                    entity_type,
                    entity_id,
                    op_type: ReplicationOpType::parse(&op_type).unwrap_or(ReplicationOpType::Upsert),
                    payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                }
            })
            .collect())
    }

    /// Fast-forward `cursor` past any leading ops not originating from
    /// `device_id`, so pushers never reconsider them.
    pub async fn normalize_outbound_cursor(
        &self,
        cursor: Option<&str>,
        device_id: &str,
    ) -> DbResult<Option<String>> {
        let mut effective = cursor.map(str::to_string);
        loop {
            let batch = self
                .load_replication_ops_since(effective.as_deref(), 1, None)
                .await?;
            let Some(op) = batch.into_iter().next() else {
                break;
            };
            if op.origin_device_id == device_id {
                break;
            }
            effective = Some(op.cursor().as_str().to_string());
        }
        Ok(effective)
    }

    /// Apply a batch of ops idempotently, keyed by
    /// `(entity_type, entity_id, op_id)`. Returns changed memory item ids so
    /// the caller can backfill derived fields (tags, vectors) for them.
    pub async fn apply_replication_ops(
        &self,
        ops: &[ReplicationOp],
        _source_device_id: &str,
        received_at: DateTime<Utc>,
    ) -> DbResult<(ApplyOutcome, Vec<i64>)> {
        let _guard = self.write_guard().await;
        let mut outcome = ApplyOutcome::default();
        let mut changed_memory_items = Vec::new();

        for op in ops {
            let mut tx = self.pool.begin().await?;

            let already: Option<(String,)> = sqlx::query_as(
                "SELECT op_id FROM applied_ops WHERE entity_type = ?1 AND entity_id = ?2 AND op_id = ?3",
            )
            .bind(&op.entity_type)
            .bind(&op.entity_id)
            .bind(&op.op_id)
            .fetch_optional(&mut *tx)
            .await?;

            if already.is_some() {
                outcome.skipped += 1;
                tx.rollback().await?;
                continue;
            }

            let applied = match op.entity_type.as_str() {
                "memory_item" => {
                    let (was_insert, item_id) =
                        super::memory_items::apply_upsert_tx(&mut tx, op).await?;
                    changed_memory_items.push(item_id);
                    Some(was_insert)
                }
                "session" => Some(super::sessions_apply::apply_session_tx(&mut tx, op).await?),
                _ => None,
            };

            match applied {
                Some(true) => outcome.inserted += 1,
                Some(false) => outcome.updated += 1,
                None => {
                    tx.rollback().await?;
                    continue;
                }
            }

            sqlx::query(
                "INSERT INTO applied_ops (entity_type, entity_id, op_id, applied_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&op.entity_type)
            .bind(&op.entity_id)
            .bind(&op.op_id)
            .bind(received_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }

        Ok((outcome, changed_memory_items))
    }

    /// One-shot preflight (§4.6, from the original's `sync_pass_preflight`):
    /// walk memory items with no corresponding replication op yet — rows
    /// written before replication existed, or restored from a legacy export
    /// — and append one op per item so a sync pass has something to push.
    /// Returns the number of ops appended.
    pub async fn backfill_replication_ops(&self, device_id: &str) -> DbResult<u64> {
        let missing: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM memory_items
            WHERE id NOT IN (
                SELECT CAST(entity_id AS INTEGER) FROM replication_ops WHERE entity_type = 'memory_item'
            )
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut appended = 0u64;
        for (id,) in missing {
            let _guard = self.write_guard().await;
            let mut tx = self.pool.begin().await?;
            let item: Option<super::memory_items::MemoryItem> =
                sqlx::query_as("SELECT * FROM memory_items WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(item) = item else {
                tx.rollback().await?;
                continue;
            };

            let payload = json!({
                "id": item.id,
                "session_id": item.session_id,
                "kind": item.kind,
                "title": item.title,
                "body_text": item.body_text,
                "confidence": item.confidence,
                "created_at": item.created_at,
                "updated_at": item.updated_at,
                "active": item.active,
                "metadata": item.metadata,
                "import_key": item.import_key,
                "project": item.project,
            });
            let op_type =
                if item.active { ReplicationOpType::Upsert } else { ReplicationOpType::Delete };
            append_op_tx(&mut tx, device_id, "memory_item", &id.to_string(), op_type, &payload)
                .await?;
            tx.commit().await?;
            appended += 1;
        }
        Ok(appended)
    }
}

/// Removes ops whose origin equals `peer_device_id` (loop prevention) and
/// returns the retained ops plus the trailing cursor of the retained prefix
/// (i.e. of the last op examined, retained or not, so paging still
/// advances over skipped-only batches).
pub fn filter_replication_ops_for_sync(
    ops: &[ReplicationOp],
    peer_device_id: &str,
) -> (Vec<ReplicationOp>, Option<Cursor>) {
    let trailing_cursor = ops.last().map(ReplicationOp::cursor);
    let retained: Vec<ReplicationOp> = ops
        .iter()
        .filter(|op| op.origin_device_id != peer_device_id)
        .cloned()
        .collect();
    (retained, trailing_cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(origin: &str, created_at: &str, op_id: &str) -> ReplicationOp {
        ReplicationOp {
            op_id: op_id.to_string(),
            created_at: created_at.to_string(),
            origin_device_id: origin.to_string(),
            entity_type: "memory_item".to_string(),
            entity_id: "1".to_string(),
            op_type: ReplicationOpType::Upsert,
            payload: Value::Null,
        }
    }

    #[test]
    fn filter_removes_peer_origin_ops() {
        let ops = vec![
            op("local", "2026-01-01T00:00:00Z", "a"),
            op("peer-x", "2026-01-01T00:00:01Z", "b"),
            op("local", "2026-01-01T00:00:02Z", "c"),
        ];
        let (retained, cursor) = filter_replication_ops_for_sync(&ops, "peer-x");
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0].op_id, "a");
        assert_eq!(retained[1].op_id, "c");
        assert_eq!(cursor.unwrap().as_str(), "2026-01-01T00:00:02Z|c");
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .remember(
                "sess-1",
                "decision",
                "Use SQLite",
                "Because it's embedded",
                1.0,
                Value::Null,
                None,
                "proj",
                "local-device",
            )
            .await
            .unwrap();
        let ops = db.load_replication_ops_since(None, 10, None).await.unwrap();
        assert_eq!(ops.len(), 1);

        let (first, changed) = db
            .apply_replication_ops(&ops, "remote-device", Utc::now())
            .await
            .unwrap();
        assert_eq!(first.inserted + first.updated, 1);
        assert_eq!(changed, vec![id]);

        let (second, _) = db
            .apply_replication_ops(&ops, "remote-device", Utc::now())
            .await
            .unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.inserted + second.updated, 0);
    }

    #[tokio::test]
    async fn backfill_appends_ops_only_for_items_missing_one() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .remember("sess-1", "note", "t", "b", 1.0, Value::Null, None, "proj", "local")
            .await
            .unwrap();
        // remember() already appended an op for `id`; insert a second row
        // directly, bypassing the writer, to simulate a pre-replication row.
        sqlx::query(
            "INSERT INTO memory_items (id, session_id, kind, title, body_text, confidence, tags_text, created_at, updated_at, active, metadata, project) VALUES (999, 's', 'note', 't2', 'b2', 1.0, '', '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00', 1, '{}', 'proj')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let appended = db.backfill_replication_ops("local").await.unwrap();
        assert_eq!(appended, 1);

        let ops = db.load_replication_ops_since(None, 10, None).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|op| op.entity_id == id.to_string()));
        assert!(ops.iter().any(|op| op.entity_id == "999"));

        // a second run is a no-op now that every item has an op.
        let appended_again = db.backfill_replication_ops("local").await.unwrap();
        assert_eq!(appended_again, 0);
    }
}
