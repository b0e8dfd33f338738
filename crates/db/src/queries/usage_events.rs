//! Usage events (§3 "Usage event"): observability records logged by the
//! pack builder and retrieval engine when `log_usage` is set.

use crate::{Database, DbResult};
use chrono::Utc;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UsageEvent {
    pub id: i64,
    pub event: String,
    pub project: Option<String>,
    pub tokens_read: i64,
    pub tokens_saved: i64,
    #[sqlx(json)]
    pub metadata: Value,
    pub created_at: String,
}

impl Database {
    pub async fn record_usage_event(
        &self,
        event: &str,
        project: Option<&str>,
        tokens_read: i64,
        tokens_saved: i64,
        metadata: Value,
    ) -> DbResult<i64> {
        let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
        let result = sqlx::query(
            r#"
            INSERT INTO usage_events (event, project, tokens_read, tokens_saved, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(event)
        .bind(project)
        .bind(tokens_read)
        .bind(tokens_saved)
        .bind(&metadata_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The most recent `pack` usage event scoped to `project`, used by the
    /// pack builder's delta accounting (§4.5 step 5).
    pub async fn most_recent_pack_event(&self, project: &str) -> DbResult<Option<UsageEvent>> {
        let row = sqlx::query_as::<_, UsageEvent>(
            r#"
            SELECT * FROM usage_events
            WHERE event = 'pack' AND (project = ?1 OR (project IS NULL AND ?1 = ''))
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(project)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_and_looks_up_most_recent_pack_event() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_usage_event("pack", Some("proj"), 100, 20, json!({"pack_item_ids": [1,2,3]}))
            .await
            .unwrap();
        let latest = db.most_recent_pack_event("proj").await.unwrap().unwrap();
        assert_eq!(latest.tokens_read, 100);
        assert_eq!(latest.metadata["pack_item_ids"], json!([1, 2, 3]));
    }
}
