//! The memory item writer (§4.2, §3 "Memory item"). Every write here emits
//! a replication op in the same transaction as the row mutation.

use crate::queries::replication::{append_op_tx, ReplicationOp, ReplicationOpType};
use crate::{Database, DbResult};
use chrono::Utc;
use codemem_core::{normalize_kind, MemoryFilters};
use serde_json::{json, Value};
use sqlx::{Sqlite, Transaction};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MemoryItem {
    pub id: i64,
    pub session_id: String,
    pub kind: String,
    pub title: String,
    pub body_text: String,
    pub confidence: f64,
    pub tags_text: String,
    pub created_at: String,
    pub updated_at: String,
    pub active: bool,
    #[sqlx(json)]
    pub metadata: Value,
    pub import_key: Option<String>,
    pub project: String,
}

impl codemem_core::MemoryLike for MemoryItem {
    fn id(&self) -> i64 {
        self.id
    }
    fn kind(&self) -> &str {
        &self.kind
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn body(&self) -> &str {
        &self.body_text
    }
    fn tags_text(&self) -> &str {
        &self.tags_text
    }
    fn created_at(&self) -> &str {
        &self.created_at
    }
    fn confidence(&self) -> f64 {
        self.confidence
    }
    fn metadata(&self) -> &Value {
        &self.metadata
    }
    fn project(&self) -> &str {
        &self.project
    }
    fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Database {
    /// Insert a new memory item, or upsert an existing one sharing the same
    /// `import_key`. `tags_text` starts empty; the indexer crate backfills
    /// it (and any embedding) after the transaction commits.
    pub async fn remember(
        &self,
        session_id: &str,
        kind: &str,
        title: &str,
        body: &str,
        confidence: f64,
        metadata: Value,
        import_key: Option<&str>,
        project: &str,
        device_id: &str,
    ) -> DbResult<i64> {
        let _guard = self.write_guard().await;
        let canonical_kind = normalize_kind(kind).as_str();
        let now = Utc::now().to_rfc3339();
        let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

        let mut tx = self.pool.begin().await?;

        let existing_id: Option<(i64,)> = match import_key {
            Some(key) if !key.is_empty() => {
                sqlx::query_as(
                    "SELECT id FROM memory_items WHERE import_key = ?1 AND active = 1",
                )
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?
            }
            _ => None,
        };

        let id = if let Some((id,)) = existing_id {
            sqlx::query(
                r#"
                UPDATE memory_items SET
                    session_id = ?1, kind = ?2, title = ?3, body_text = ?4,
                    confidence = ?5, updated_at = ?6, metadata = ?7, project = ?8
                WHERE id = ?9
                "#,
            )
            .bind(session_id)
            .bind(canonical_kind)
            .bind(title)
            .bind(body)
            .bind(confidence)
            .bind(&now)
            .bind(&metadata_json)
            .bind(project)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            id
        } else {
            let result = sqlx::query(
                r#"
                INSERT INTO memory_items (session_id, kind, title, body_text, confidence, tags_text, created_at, updated_at, active, metadata, import_key, project)
                VALUES (?1, ?2, ?3, ?4, ?5, '', ?6, ?6, 1, ?7, ?8, ?9)
                "#,
            )
            .bind(session_id)
            .bind(canonical_kind)
            .bind(title)
            .bind(body)
            .bind(confidence)
            .bind(&now)
            .bind(&metadata_json)
            .bind(import_key)
            .bind(project)
            .execute(&mut *tx)
            .await?;
            result.last_insert_rowid()
        };

        let payload = json!({
            "id": id,
            "session_id": session_id,
            "kind": canonical_kind,
            "title": title,
            "body_text": body,
            "confidence": confidence,
            "created_at": now,
            "updated_at": now,
            "active": true,
            "metadata": metadata,
            "import_key": import_key,
            "project": project,
        });
        append_op_tx(
            &mut tx,
            device_id,
            "memory_item",
            &id.to_string(),
            ReplicationOpType::Upsert,
            &payload,
        )
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Mark an item inactive. The row is preserved for auditability.
    pub async fn forget(&self, id: i64, device_id: &str) -> DbResult<bool> {
        let _guard = self.write_guard().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE memory_items SET active = 0, updated_at = ?1 WHERE id = ?2 AND active = 1",
        )
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        append_op_tx(
            &mut tx,
            device_id,
            "memory_item",
            &id.to_string(),
            ReplicationOpType::Delete,
            &json!({ "id": id }),
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<MemoryItem>> {
        let row = sqlx::query_as::<_, MemoryItem>(
            "SELECT * FROM memory_items WHERE id = ?1 AND active = 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Stable to input order; skips missing and inactive ids entirely
    /// (no placeholder returned for them — callers diff against input ids
    /// to find what's missing).
    pub async fn get_many(&self, ids: &[i64]) -> DbResult<Vec<MemoryItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT * FROM memory_items WHERE active = 1 AND id IN ({})",
            placeholders.join(", ")
        );
        let mut query = sqlx::query_as::<_, MemoryItem>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id = std::collections::HashMap::new();
        for row in rows {
            by_id.insert(row.id, row);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    pub async fn recent(&self, limit: i64, filters: &MemoryFilters) -> DbResult<Vec<MemoryItem>> {
        self.recent_by_kinds(&[], limit, filters).await
    }

    pub async fn recent_by_kinds(
        &self,
        kinds: &[String],
        limit: i64,
        filters: &MemoryFilters,
    ) -> DbResult<Vec<MemoryItem>> {
        let mut sql = String::from("SELECT * FROM memory_items WHERE active = 1");
        let mut binds: Vec<String> = Vec::new();

        if !kinds.is_empty() {
            let placeholders: Vec<String> = kinds.iter().map(|_| "?".to_string()).collect();
            sql.push_str(&format!(" AND kind IN ({})", placeholders.join(", ")));
            binds.extend(kinds.iter().cloned());
        }
        if let Some(kind) = &filters.kind {
            sql.push_str(" AND kind = ?");
            binds.push(kind.clone());
        }
        if let Some(session_id) = &filters.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(session_id.clone());
        }
        if let Some(since) = filters.since {
            sql.push_str(" AND created_at >= ?");
            binds.push(since.to_rfc3339());
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, MemoryItem>(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(limit);

        let mut rows = query.fetch_all(&self.pool).await?;
        if let Some(project) = &filters.project {
            rows.retain(|row| codemem_core::filters::project_matches(&row.project, project));
        }
        Ok(rows)
    }

    /// Set `tags_text` for an item (called by the indexer's backfill path).
    pub async fn set_tags_text(&self, id: i64, tags_text: &str) -> DbResult<()> {
        sqlx::query("UPDATE memory_items SET tags_text = ?1 WHERE id = ?2")
            .bind(tags_text)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Apply one `memory_item` replication op inside an open transaction.
/// Matches by `import_key` when present in the payload, falling back to
/// `entity_id`, per §4.6. Returns `(was_insert, item_id)`.
pub(crate) async fn apply_upsert_tx(
    tx: &mut Transaction<'_, Sqlite>,
    op: &ReplicationOp,
) -> DbResult<(bool, i64)> {
    let payload = &op.payload;
    let import_key = payload.get("import_key").and_then(Value::as_str);

    let existing: Option<(i64,)> = if let Some(key) = import_key.filter(|k| !k.is_empty()) {
        sqlx::query_as("SELECT id FROM memory_items WHERE import_key = ?1")
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?
    } else {
        let entity_id: i64 = op.entity_id.parse().unwrap_or(0);
        sqlx::query_as("SELECT id FROM memory_items WHERE id = ?1")
            .bind(entity_id)
            .fetch_optional(&mut **tx)
            .await?
    };

    let kind = payload
        .get("kind")
        .and_then(Value::as_str)
        .map(normalize_kind)
        .unwrap_or(codemem_core::MemoryKind::Note)
        .as_str();
    let title = payload.get("title").and_then(Value::as_str).unwrap_or("");
    let body = payload.get("body_text").and_then(Value::as_str).unwrap_or("");
    let confidence = payload.get("confidence").and_then(Value::as_f64).unwrap_or(1.0);
    let session_id = payload.get("session_id").and_then(Value::as_str).unwrap_or("");
    let project = payload.get("project").and_then(Value::as_str).unwrap_or("");
    let active = matches!(op.op_type, ReplicationOpType::Upsert);
    let metadata = payload.get("metadata").cloned().unwrap_or(Value::Null);
    let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
    let created_at = payload
        .get("created_at")
        .and_then(Value::as_str)
        .unwrap_or(&op.created_at)
        .to_string();
    let updated_at = payload
        .get("updated_at")
        .and_then(Value::as_str)
        .unwrap_or(&op.created_at)
        .to_string();

    if let Some((id,)) = existing {
        sqlx::query(
            r#"
            UPDATE memory_items SET
                session_id = ?1, kind = ?2, title = ?3, body_text = ?4, confidence = ?5,
                updated_at = ?6, active = ?7, metadata = ?8, project = ?9,
                import_key = COALESCE(import_key, ?10)
            WHERE id = ?11
            "#,
        )
        .bind(session_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(confidence)
        .bind(&updated_at)
        .bind(active)
        .bind(&metadata_json)
        .bind(project)
        .bind(import_key)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok((false, id))
    } else {
        let requested_id: i64 = op.entity_id.parse().unwrap_or(0);
        let result = sqlx::query(
            r#"
            INSERT INTO memory_items (id, session_id, kind, title, body_text, confidence, tags_text, created_at, updated_at, active, metadata, import_key, project)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(requested_id)
        .bind(session_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(confidence)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(active)
        .bind(&metadata_json)
        .bind(import_key)
        .bind(project)
        .execute(&mut **tx)
        .await?;
        let id = if result.last_insert_rowid() != 0 {
            result.last_insert_rowid()
        } else {
            requested_id
        };
        Ok((true, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn remember_upserts_by_import_key() {
        let db = Database::new_in_memory().await.unwrap();
        let id1 = db
            .remember(
                "sess-1", "decision", "Title", "Body", 1.0, json!({}), Some("ext-1"), "proj",
                "local",
            )
            .await
            .unwrap();
        let id2 = db
            .remember(
                "sess-1", "decision", "Title v2", "Body v2", 0.9, json!({}), Some("ext-1"),
                "proj", "local",
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let item = db.get(id1).await.unwrap().unwrap();
        assert_eq!(item.title, "Title v2");
    }

    #[tokio::test]
    async fn forget_hides_without_deleting_row() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .remember("sess-1", "note", "t", "b", 1.0, json!({}), None, "proj", "local")
            .await
            .unwrap();
        assert!(db.forget(id, "local").await.unwrap());
        assert!(db.get(id).await.unwrap().is_none());

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memory_items WHERE id = ?1")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn get_many_is_stable_to_input_order_and_skips_missing() {
        let db = Database::new_in_memory().await.unwrap();
        let a = db
            .remember("s", "note", "A", "b", 1.0, json!({}), None, "proj", "local")
            .await
            .unwrap();
        let b = db
            .remember("s", "note", "B", "b", 1.0, json!({}), None, "proj", "local")
            .await
            .unwrap();

        let result = db.get_many(&[b, 999_999, a]).await.unwrap();
        assert_eq!(result.iter().map(|i| i.id).collect::<Vec<_>>(), vec![b, a]);
    }
}
