//! Raw-event ingest (§4.9, C9): deduplicated append of pre-classification
//! events, plus the bookkeeping tables the debounced flusher and idle
//! sweeper (both implemented in `codemem-ingest`) need to do their work.

use crate::{Database, DbResult};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventStatus {
    Pending,
    Flushed,
    Error,
}

impl RawEventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RawEventStatus::Pending => "pending",
            RawEventStatus::Flushed => "flushed",
            RawEventStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "flushed" => RawEventStatus::Flushed,
            "error" => RawEventStatus::Error,
            _ => RawEventStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventBatchStatus {
    Pending,
    Completed,
    Error,
}

impl RawEventBatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RawEventBatchStatus::Pending => "pending",
            RawEventBatchStatus::Completed => "completed",
            RawEventBatchStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: i64,
    pub opencode_session_id: String,
    pub event_id: String,
    pub event_seq: i64,
    pub event_type: String,
    pub ts_wall_ms: i64,
    pub ts_mono_ms: i64,
    pub payload: Value,
    pub status: RawEventStatus,
    pub attempt_count: i64,
    pub created_at: String,
}

/// The outcome of one [`Database::record_raw_event`] call. Exactly one of
/// these four buckets is incremented per attempt, matching the testable
/// property that a duplicate bumps `skipped_duplicate` by exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    SkippedDuplicate,
    SkippedConflict,
    SkippedInvalid,
}

/// Aggregated ingest counters over a window, as consumed by
/// `reliability_metrics` (§4.9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawEventStats {
    pub attempted_events: i64,
    pub skipped_duplicate: i64,
    pub skipped_conflict: i64,
    pub skipped_invalid: i64,
    pub inserted_events: i64,
}

fn payload_hash(payload: &Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn window_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:00:00Z").to_string()
}

fn is_malformed(session_id: &str, event_id: &str, event_type: &str, ts_wall_ms: i64) -> bool {
    session_id.trim().is_empty()
        || event_id.trim().is_empty()
        || event_type.trim().is_empty()
        || ts_wall_ms <= 0
}

impl Database {
    /// Insert if `(session_id, event_id)` is new. Returns the outcome
    /// bucket; callers with no further use for the distinction can check
    /// `outcome == IngestOutcome::Inserted`.
    pub async fn record_raw_event(
        &self,
        session_id: &str,
        event_id: &str,
        event_type: &str,
        payload: Value,
        ts_wall_ms: i64,
        ts_mono_ms: i64,
    ) -> DbResult<IngestOutcome> {
        let now = Utc::now();
        let outcome = if is_malformed(session_id, event_id, event_type, ts_wall_ms) {
            IngestOutcome::SkippedInvalid
        } else {
            let hash = payload_hash(&payload);
            let existing: Option<(String,)> = sqlx::query_as(
                "SELECT payload_hash FROM raw_events WHERE opencode_session_id = ?1 AND event_id = ?2",
            )
            .bind(session_id)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

            match existing {
                Some((existing_hash,)) if existing_hash == hash => IngestOutcome::SkippedDuplicate,
                Some(_) => IngestOutcome::SkippedConflict,
                None => {
                    let next_seq: (i64,) = sqlx::query_as(
                        "SELECT COALESCE(MAX(event_seq), -1) + 1 FROM raw_events WHERE opencode_session_id = ?1",
                    )
                    .bind(session_id)
                    .fetch_one(&self.pool)
                    .await?;
                    let payload_json =
                        serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

                    sqlx::query(
                        r#"
                        INSERT INTO raw_events (opencode_session_id, event_id, event_seq, event_type, ts_wall_ms, ts_mono_ms, payload, payload_hash, status, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
                        "#,
                    )
                    .bind(session_id)
                    .bind(event_id)
                    .bind(next_seq.0)
                    .bind(event_type)
                    .bind(ts_wall_ms)
                    .bind(ts_mono_ms)
                    .bind(&payload_json)
                    .bind(&hash)
                    .bind(now.to_rfc3339())
                    .execute(&self.pool)
                    .await?;

                    self.note_session_activity(session_id, now).await?;
                    IngestOutcome::Inserted
                }
            }
        };

        self.bump_ingest_stats(now, outcome).await?;
        Ok(outcome)
    }

    async fn bump_ingest_stats(&self, at: DateTime<Utc>, outcome: IngestOutcome) -> DbResult<()> {
        let bucket = window_bucket(at);
        sqlx::query(
            "INSERT INTO raw_event_ingest_stats (window_start) VALUES (?1) ON CONFLICT(window_start) DO NOTHING",
        )
        .bind(&bucket)
        .execute(&self.pool)
        .await?;

        let column = match outcome {
            IngestOutcome::Inserted => "inserted_events",
            IngestOutcome::SkippedDuplicate => "skipped_duplicate",
            IngestOutcome::SkippedConflict => "skipped_conflict",
            IngestOutcome::SkippedInvalid => "skipped_invalid",
        };
        let sql = format!(
            "UPDATE raw_event_ingest_stats SET attempted_events = attempted_events + 1, {column} = {column} + 1 WHERE window_start = ?1"
        );
        sqlx::query(&sql).bind(&bucket).execute(&self.pool).await?;
        Ok(())
    }

    /// Aggregated counters over the trailing `window_hours`.
    pub async fn raw_event_stats_since(&self, window_hours: i64) -> DbResult<RawEventStats> {
        let since = window_bucket(Utc::now() - Duration::hours(window_hours));
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(attempted_events), 0),
                COALESCE(SUM(skipped_duplicate), 0),
                COALESCE(SUM(skipped_conflict), 0),
                COALESCE(SUM(skipped_invalid), 0),
                COALESCE(SUM(inserted_events), 0)
            FROM raw_event_ingest_stats
            WHERE window_start >= ?1
            "#,
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;
        Ok(RawEventStats {
            attempted_events: row.0,
            skipped_duplicate: row.1,
            skipped_conflict: row.2,
            skipped_invalid: row.3,
            inserted_events: row.4,
        })
    }

    pub(crate) async fn note_session_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO raw_event_sessions (opencode_session_id, started_at, last_activity_at, pending_count)
            VALUES (?1, ?2, ?2, 1)
            ON CONFLICT(opencode_session_id) DO UPDATE SET
                last_activity_at = excluded.last_activity_at,
                pending_count = raw_event_sessions.pending_count + 1
            "#,
        )
        .bind(session_id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pending (not yet flushed) events for one session, oldest first,
    /// capped at `limit` when set — the batch a flush hands to the
    /// classifier.
    pub async fn pending_raw_events_for_session(
        &self,
        session_id: &str,
        limit: Option<u64>,
    ) -> DbResult<Vec<RawEvent>> {
        let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        #[allow(clippy::type_complexity)]
        let rows: Vec<(i64, String, String, i64, String, i64, i64, String, String, i64, String)> =
            sqlx::query_as(
                r#"
                SELECT id, opencode_session_id, event_id, event_seq, event_type, ts_wall_ms, ts_mono_ms, payload, status, attempt_count, created_at
                FROM raw_events
                WHERE opencode_session_id = ?1 AND status = 'pending'
                ORDER BY event_seq ASC
                LIMIT ?2
                "#,
            )
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, session_id, event_id, event_seq, event_type, ts_wall_ms, ts_mono_ms, payload, status, attempt_count, created_at)| {
                RawEvent {
                    id,
                    opencode_session_id: session_id,
                    event_id,
                    event_seq,
                    event_type,
                    ts_wall_ms,
                    ts_mono_ms,
                    payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                    status: RawEventStatus::parse(&status),
                    attempt_count,
                    created_at,
                }
            })
            .collect())
    }

    /// Bump `attempt_count` for every pending event of a session whose
    /// flush failed, so `retry_depth_max` can see how many times a batch
    /// was retried before succeeding (or being marked stuck).
    pub async fn bump_raw_event_attempts(&self, session_id: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE raw_events SET attempt_count = attempt_count + 1 WHERE opencode_session_id = ?1 AND status = 'pending'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sessions idle (no activity) for at least `idle_ms`, with pending
    /// work, not already drained.
    pub async fn idle_sessions(&self, idle_ms: i64, limit: i64) -> DbResult<Vec<String>> {
        let cutoff = Utc::now() - Duration::milliseconds(idle_ms);
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT opencode_session_id FROM raw_event_sessions
            WHERE pending_count > 0 AND last_activity_at <= ?1
            ORDER BY last_activity_at ASC
            LIMIT ?2
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Sessions with pending work regardless of idle time, bounded to
    /// `limit`, for the sweeper's "flush sessions whose queue has pending
    /// work" step.
    pub async fn sessions_with_pending_work(&self, limit: i64) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT opencode_session_id FROM raw_event_sessions WHERE pending_count > 0 ORDER BY last_activity_at ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Record a session boundary once known — a no-op if already set, since
    /// a session's `started_at` is immutable once the first flush observes
    /// it (mirrors `sessions.started_at`'s write-once semantics).
    pub async fn note_session_started(&self, session_id: &str, started_at: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE raw_event_sessions SET started_at = ?1 WHERE opencode_session_id = ?2 AND started_at IS NULL",
        )
        .bind(started_at)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that a session's pending events have been flushed (whether
    /// successfully classified or not — the caller decides batch status).
    pub async fn mark_session_flushed(&self, session_id: &str, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE raw_event_sessions SET pending_count = 0, last_flush_at = ?1 WHERE opencode_session_id = ?2",
        )
        .bind(at.to_rfc3339())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "UPDATE raw_events SET status = 'flushed' WHERE opencode_session_id = ?1 AND status = 'pending'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Purge events older than `retention` (a no-op when `retention` is
    /// zero, per §4.9 step 1's "if retention > 0").
    pub async fn purge_events_older_than(&self, retention: std::time::Duration) -> DbResult<u64> {
        if retention.is_zero() {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::from_std(retention).unwrap_or(Duration::zero());
        let result = sqlx::query("DELETE FROM raw_events WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Mark batches stuck in `pending` beyond `stuck_batch_ms` as `error`.
    pub async fn mark_stuck_batches(&self, stuck_batch_ms: i64) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::milliseconds(stuck_batch_ms);
        let result = sqlx::query(
            "UPDATE raw_event_batches SET status = 'error' WHERE status = 'pending' AND created_at < ?1",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Record the outcome of one flush attempt for a session.
    pub async fn record_batch(
        &self,
        session_id: &str,
        status: RawEventBatchStatus,
        attempt_count: i64,
    ) -> DbResult<i64> {
        let now = Utc::now().to_rfc3339();
        let completed_at = match status {
            RawEventBatchStatus::Pending => None,
            _ => Some(now.clone()),
        };
        let result = sqlx::query(
            r#"
            INSERT INTO raw_event_batches (opencode_session_id, status, attempt_count, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(attempt_count)
        .bind(&now)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// `(completed_count, error_count, max_attempt_count)` for batches
    /// created within the trailing `window_hours`, feeding
    /// `flush_success_rate` and `retry_depth_max`.
    pub async fn batch_stats_since(&self, window_hours: i64) -> DbResult<(i64, i64, i64)> {
        let since = (Utc::now() - Duration::hours(window_hours)).to_rfc3339();
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0),
                COALESCE(MAX(attempt_count), 0)
            FROM raw_event_batches
            WHERE created_at >= ?1
            "#,
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// `(sessions_with_started_at, total_sessions)` for sessions first seen
    /// within the trailing `window_hours`, feeding
    /// `session_boundary_accuracy`. Sessions are counted against the raw
    /// event session table, not the session lifecycle table, since the
    /// metric measures raw-event boundary detection quality.
    pub async fn session_boundary_stats_since(&self, window_hours: i64) -> DbResult<(i64, i64)> {
        let since = (Utc::now() - Duration::hours(window_hours)).to_rfc3339();
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN started_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                COUNT(*)
            FROM raw_event_sessions
            WHERE last_activity_at >= ?1
            "#,
        )
        .bind(&since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// The raw-event pipeline's health block (§4.9), combining ingest,
    /// flush-batch, and session-boundary counters over the trailing
    /// `window_hours` into the three documented rates plus retry depth.
    pub async fn reliability_metrics(&self, window_hours: i64) -> DbResult<ReliabilityMetrics> {
        let stats = self.raw_event_stats_since(window_hours).await?;
        let (completed, error, max_attempt_count) = self.batch_stats_since(window_hours).await?;
        let (sessions_with_started_at, total_sessions) =
            self.session_boundary_stats_since(window_hours).await?;

        let dropped_events = stats.skipped_invalid + stats.skipped_conflict;
        let eligible_batches = completed + error;

        let flush_success_rate = if eligible_batches > 0 {
            completed as f64 / eligible_batches as f64
        } else {
            0.0
        };
        let dropped_event_rate = if stats.attempted_events > 0 {
            dropped_events as f64 / stats.attempted_events as f64
        } else {
            0.0
        };
        let session_boundary_accuracy = if total_sessions > 0 {
            sessions_with_started_at as f64 / total_sessions as f64
        } else {
            0.0
        };

        Ok(ReliabilityMetrics {
            attempted_events: stats.attempted_events,
            inserted_events: stats.inserted_events,
            dropped_events,
            eligible_batches,
            eligible_sessions: total_sessions,
            flush_success_rate,
            dropped_event_rate,
            session_boundary_accuracy,
            retry_depth_max: (max_attempt_count - 1).max(0),
        })
    }
}

/// The computed health block for the raw-event pipeline (§4.9). Field names
/// match the formulas named in the spec directly so callers (the
/// `raw-events-gate` CLI, `MemoryService::stats`) don't have to re-derive
/// them from the raw counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReliabilityMetrics {
    pub attempted_events: i64,
    pub inserted_events: i64,
    pub dropped_events: i64,
    pub eligible_batches: i64,
    pub eligible_sessions: i64,
    pub flush_success_rate: f64,
    pub dropped_event_rate: f64,
    pub session_boundary_accuracy: f64,
    pub retry_depth_max: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn duplicate_event_is_counted_once() {
        let db = Database::new_in_memory().await.unwrap();
        let first = db
            .record_raw_event("s1", "e1", "tool_call", json!({"a": 1}), 1000, 1)
            .await
            .unwrap();
        assert_eq!(first, IngestOutcome::Inserted);

        let second = db
            .record_raw_event("s1", "e1", "tool_call", json!({"a": 1}), 1000, 1)
            .await
            .unwrap();
        assert_eq!(second, IngestOutcome::SkippedDuplicate);

        let stats = db.raw_event_stats_since(1).await.unwrap();
        assert_eq!(stats.inserted_events, 1);
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(stats.skipped_invalid + stats.skipped_conflict, 0);
    }

    #[tokio::test]
    async fn conflicting_payload_is_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_raw_event("s1", "e1", "tool_call", json!({"a": 1}), 1000, 1)
            .await
            .unwrap();
        let outcome = db
            .record_raw_event("s1", "e1", "tool_call", json!({"a": 2}), 1000, 1)
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::SkippedConflict);
    }

    #[tokio::test]
    async fn malformed_event_is_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        let outcome = db
            .record_raw_event("", "e1", "tool_call", json!({}), 1000, 1)
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::SkippedInvalid);
    }

    #[tokio::test]
    async fn reliability_metrics_matches_documented_formulas() {
        let db = Database::new_in_memory().await.unwrap();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO raw_event_sessions (opencode_session_id, started_at, last_activity_at, pending_count) VALUES ('sess-a', ?1, ?1, 0)",
        )
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO raw_event_sessions (opencode_session_id, started_at, last_activity_at, pending_count) VALUES ('sess-b', NULL, ?1, 0)",
        )
        .bind(&now)
        .execute(db.pool())
        .await
        .unwrap();

        let bucket = window_bucket(Utc::now());
        sqlx::query(
            "INSERT INTO raw_event_ingest_stats (window_start, attempted_events, skipped_duplicate, skipped_conflict, skipped_invalid, inserted_events) VALUES (?1, 100, 0, 0, 10, 90)",
        )
        .bind(&bucket)
        .execute(db.pool())
        .await
        .unwrap();

        for _ in 0..9 {
            db.record_batch("sess-a", RawEventBatchStatus::Completed, 1).await.unwrap();
        }
        db.record_batch("sess-a", RawEventBatchStatus::Error, 2).await.unwrap();

        let metrics = db.reliability_metrics(24).await.unwrap();
        assert_eq!(metrics.flush_success_rate, 0.9);
        assert_eq!(metrics.dropped_event_rate, 0.1);
        assert_eq!(metrics.session_boundary_accuracy, 0.5);
        assert_eq!(metrics.retry_depth_max, 1);
    }

    #[tokio::test]
    async fn duplicate_replay_does_not_increase_dropped_rate() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_raw_event("sess", "evt-1", "user_prompt", json!({"prompt_text": "hello"}), 1, 1)
            .await
            .unwrap();
        db.record_raw_event("sess", "evt-1", "user_prompt", json!({"prompt_text": "hello"}), 2, 2)
            .await
            .unwrap();

        let metrics = db.reliability_metrics(24).await.unwrap();
        assert_eq!(metrics.inserted_events, 1);
        assert_eq!(metrics.dropped_events, 0);
        assert_eq!(metrics.dropped_event_rate, 0.0);
    }

    #[tokio::test]
    async fn event_seq_is_monotonic_per_session() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_raw_event("s1", "e1", "t", json!({}), 1, 1).await.unwrap();
        db.record_raw_event("s1", "e2", "t", json!({}), 2, 2).await.unwrap();
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT event_seq FROM raw_events WHERE opencode_session_id = 's1' ORDER BY event_seq",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(rows, vec![(0,), (1,)]);
    }
}
