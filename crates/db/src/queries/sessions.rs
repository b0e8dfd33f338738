//! Session lifecycle (§4.2): `start_session` / `end_session`. A session is
//! immutable once ended. Each call appends a replication op in the same
//! transaction as the row mutation, matching the memory item writer.

use crate::queries::replication::{append_op_tx, ReplicationOpType};
use crate::{Database, DbResult};
use chrono::Utc;
use serde_json::{json, Value};
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub cwd: Option<String>,
    pub project: String,
    pub user: Option<String>,
    pub tool_version: Option<String>,
    pub git_remote: Option<String>,
    pub git_branch: Option<String>,
    #[sqlx(json)]
    pub metadata: Value,
}

impl Database {
    /// Create and persist a new session, returning its id.
    pub async fn start_session(
        &self,
        cwd: Option<&str>,
        project: &str,
        user: Option<&str>,
        tool_version: Option<&str>,
        git_remote: Option<&str>,
        git_branch: Option<&str>,
        metadata: Value,
        device_id: &str,
    ) -> DbResult<String> {
        let _guard = self.write_guard().await;
        let id = Ulid::new().to_string();
        let started_at = Utc::now().to_rfc3339();
        let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, started_at, cwd, project, user, tool_version, git_remote, git_branch, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&id)
        .bind(&started_at)
        .bind(cwd)
        .bind(project)
        .bind(user)
        .bind(tool_version)
        .bind(git_remote)
        .bind(git_branch)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        let payload = json!({
            "id": id,
            "started_at": started_at,
            "ended_at": Value::Null,
            "cwd": cwd,
            "project": project,
            "user": user,
            "tool_version": tool_version,
            "git_remote": git_remote,
            "git_branch": git_branch,
            "metadata": metadata,
        });
        append_op_tx(&mut tx, device_id, "session", &id, ReplicationOpType::Upsert, &payload)
            .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Close a session. A no-op (returns `Ok(false)`) if already ended or
    /// absent, since a session is immutable once ended.
    pub async fn end_session(&self, session_id: &str, device_id: &str) -> DbResult<bool> {
        let _guard = self.write_guard().await;
        let ended_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
        )
        .bind(&ended_at)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let row = self.get_session(session_id).await?;
        let session = row.ok_or_else(|| {
            crate::DbError::Integrity(format!("session {session_id} vanished mid-transaction"))
        })?;
        let payload = json!({
            "id": session.id,
            "started_at": session.started_at,
            "ended_at": ended_at,
            "cwd": session.cwd,
            "project": session.project,
            "user": session.user,
            "tool_version": session.tool_version,
            "git_remote": session.git_remote,
            "git_branch": session.git_branch,
            "metadata": session.metadata,
        });
        append_op_tx(
            &mut tx,
            device_id,
            "session",
            session_id,
            ReplicationOpType::Upsert,
            &payload,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_session(&self, session_id: &str) -> DbResult<Option<Session>> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_end_session() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .start_session(Some("/tmp/proj"), "proj", None, None, None, None, json!({}), "local")
            .await
            .unwrap();

        let session = db.get_session(&id).await.unwrap().expect("session exists");
        assert_eq!(session.project, "proj");
        assert!(session.ended_at.is_none());

        assert!(db.end_session(&id, "local").await.unwrap());
        let session = db.get_session(&id).await.unwrap().unwrap();
        assert!(session.ended_at.is_some());

        // ending twice is a no-op, not an error
        assert!(!db.end_session(&id, "local").await.unwrap());
    }

    #[tokio::test]
    async fn session_writes_emit_replication_ops() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .start_session(None, "proj", None, None, None, None, json!({}), "local")
            .await
            .unwrap();
        db.end_session(&id, "local").await.unwrap();

        let ops = db.load_replication_ops_since(None, 10, None).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.entity_type == "session" && op.entity_id == id));
    }
}
