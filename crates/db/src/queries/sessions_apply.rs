//! Applies an incoming `session` replication op inside an open transaction.
//! Kept separate from `sessions.rs` (the local write path) since apply
//! semantics differ: the row may not exist locally yet, and columns that
//! are absent from the payload should not clobber what's there.

use crate::queries::replication::{ReplicationOp, ReplicationOpType};
use crate::DbResult;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

/// Returns `true` if the session row was inserted, `false` if updated.
pub(crate) async fn apply_session_tx(
    tx: &mut Transaction<'_, Sqlite>,
    op: &ReplicationOp,
) -> DbResult<bool> {
    let payload = &op.payload;
    let id = &op.entity_id;
    let started_at = payload.get("started_at").and_then(Value::as_str).unwrap_or(&op.created_at);
    let ended_at = payload.get("ended_at").and_then(Value::as_str);
    let cwd = payload.get("cwd").and_then(Value::as_str);
    let project = payload.get("project").and_then(Value::as_str).unwrap_or("");
    let user = payload.get("user").and_then(Value::as_str);
    let tool_version = payload.get("tool_version").and_then(Value::as_str);
    let git_remote = payload.get("git_remote").and_then(Value::as_str);
    let git_branch = payload.get("git_branch").and_then(Value::as_str);
    let metadata = payload.get("metadata").cloned().unwrap_or(Value::Null);
    let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

    if existing.is_some() {
        if matches!(op.op_type, ReplicationOpType::Delete) {
            sqlx::query("UPDATE sessions SET ended_at = COALESCE(ended_at, ?1) WHERE id = ?2")
                .bind(ended_at.unwrap_or(&op.created_at))
                .bind(id)
                .execute(&mut **tx)
                .await?;
            return Ok(false);
        }
        sqlx::query(
            r#"
            UPDATE sessions SET
                ended_at = COALESCE(ended_at, ?1), cwd = ?2, project = ?3, user = ?4,
                tool_version = ?5, git_remote = ?6, git_branch = ?7, metadata = ?8
            WHERE id = ?9
            "#,
        )
        .bind(ended_at)
        .bind(cwd)
        .bind(project)
        .bind(user)
        .bind(tool_version)
        .bind(git_remote)
        .bind(git_branch)
        .bind(&metadata_json)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(false)
    } else {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, started_at, ended_at, cwd, project, user, tool_version, git_remote, git_branch, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(id)
        .bind(started_at)
        .bind(ended_at)
        .bind(cwd)
        .bind(project)
        .bind(user)
        .bind(tool_version)
        .bind(git_remote)
        .bind(git_branch)
        .bind(&metadata_json)
        .execute(&mut **tx)
        .await?;
        Ok(true)
    }
}
