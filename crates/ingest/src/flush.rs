//! Flushing one session's pending raw events through the classifier into a
//! memory item (§4.9), plus the debounced auto-flush registry the edge that
//! notices session activity calls into.
//!
//! Grounded in `RawEventAutoFlusher`/`flush_raw_events` from the original:
//! a single mutex guards both the pending-timer map and the in-flight set,
//! cancel-then-replace on repeated activity, and a reentry guard so two
//! notifications racing on the same session don't double-flush.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use codemem_db::{Database, RawEventBatchStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::classifier::{Classifier, ClassifierError, FlushContext};

/// Outcome of one flush attempt, for callers that want to log or test
/// against it. `events_flushed == 0` with `memory_id: None` means there was
/// nothing pending — not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushOutcome {
    pub memory_id: Option<i64>,
    pub events_flushed: u64,
}

/// Drain and classify the pending raw events for one session, writing a
/// single memory item on success. Leaves events `pending` (for retry by a
/// later flush) on any failure other than exhausting the batch into an
/// empty classification.
pub async fn flush_session(
    db: &Database,
    classifier: &dyn Classifier,
    opencode_session_id: &str,
    context: &FlushContext,
    max_events: Option<u64>,
    device_id: &str,
) -> Result<FlushOutcome, ClassifierError> {
    let project = context
        .project
        .clone()
        .or_else(codemem_core::paths::default_project)
        .unwrap_or_default();
    let pending = db
        .pending_raw_events_for_session(opencode_session_id, max_events)
        .await
        .map_err(|e| ClassifierError::Other(e.to_string()))?;

    if pending.is_empty() {
        return Ok(FlushOutcome { memory_id: None, events_flushed: 0 });
    }

    if let Some(started_at) = &context.started_at {
        db.note_session_started(opencode_session_id, started_at)
            .await
            .map_err(|e| ClassifierError::Other(e.to_string()))?;
    }

    let attempt_count = pending.iter().map(|e| e.attempt_count).max().unwrap_or(0) + 1;

    let classified = match classifier.classify(opencode_session_id, &pending, context).await {
        Ok(classified) => classified,
        Err(err) => {
            db.bump_raw_event_attempts(opencode_session_id)
                .await
                .map_err(|e| ClassifierError::Other(e.to_string()))?;
            db.record_batch(opencode_session_id, RawEventBatchStatus::Error, attempt_count)
                .await
                .map_err(|e| ClassifierError::Other(e.to_string()))?;
            return Err(err);
        }
    };

    let memory_id = db
        .remember(
            opencode_session_id,
            &classified.category,
            &classified.title,
            &classified.body_text(),
            classified.confidence,
            classified.merged_metadata(),
            None,
            &project,
            device_id,
        )
        .await
        .map_err(|e| ClassifierError::Other(e.to_string()))?;

    db.mark_session_flushed(opencode_session_id, Utc::now())
        .await
        .map_err(|e| ClassifierError::Other(e.to_string()))?;
    db.record_batch(opencode_session_id, RawEventBatchStatus::Completed, attempt_count)
        .await
        .map_err(|e| ClassifierError::Other(e.to_string()))?;

    Ok(FlushOutcome { memory_id: Some(memory_id), events_flushed: pending.len() as u64 })
}

/// The debounced auto-flusher: `note_activity` (re)starts a per-session
/// timer; when it fires (or immediately, if the debounce is zero),
/// `flush_session` runs. A single lock covers both the timer map and the
/// in-flight set so a timer fire racing a manual `flush_now` never
/// double-flushes the same session.
pub struct AutoFlusher {
    db: Arc<Database>,
    classifier: Arc<dyn Classifier>,
    device_id: String,
    debounce: Duration,
    state: Mutex<FlusherState>,
}

#[derive(Default)]
struct FlusherState {
    timers: HashMap<String, JoinHandle<()>>,
    flushing: HashSet<String>,
}

impl AutoFlusher {
    pub fn new(
        db: Arc<Database>,
        classifier: Arc<dyn Classifier>,
        device_id: String,
        debounce: Duration,
    ) -> Self {
        Self { db, classifier, device_id, debounce, state: Mutex::new(FlusherState::default()) }
    }

    /// Cancel any pending timer for `session_id` and start a fresh one (or
    /// flush immediately if the debounce window is zero), matching the
    /// original's "cancel-then-replace" `note_activity`.
    pub async fn note_activity(self: &Arc<Self>, opencode_session_id: &str, context: FlushContext) {
        if opencode_session_id.is_empty() {
            return;
        }
        if self.debounce.is_zero() {
            self.flush_now(opencode_session_id.to_string(), context).await;
            return;
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.timers.remove(opencode_session_id) {
            existing.abort();
        }
        let flusher = Arc::clone(self);
        let session_id = opencode_session_id.to_string();
        let delay = self.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flusher.flush_now(session_id, context).await;
        });
        state.timers.insert(opencode_session_id.to_string(), handle);
    }

    /// Flush `opencode_session_id` now, guarded against re-entry: if a
    /// flush for this session is already running, this call is a no-op.
    pub async fn flush_now(self: &Arc<Self>, opencode_session_id: String, context: FlushContext) {
        {
            let mut state = self.state.lock().await;
            if !state.flushing.insert(opencode_session_id.clone()) {
                return;
            }
            if let Some(timer) = state.timers.remove(&opencode_session_id) {
                timer.abort();
            }
        }

        let result = flush_session(
            &self.db,
            self.classifier.as_ref(),
            &opencode_session_id,
            &context,
            None,
            &self.device_id,
        )
        .await;

        if let Err(err) = result {
            warn!(session_id = %opencode_session_id, error = %err, "auto-flush failed");
        }

        let mut state = self.state.lock().await;
        state.flushing.remove(&opencode_session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codemem_db::RawEvent;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClassifier {
        calls: AtomicUsize,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify(
            &self,
            _session: &str,
            events: &[RawEvent],
            _context: &FlushContext,
        ) -> Result<crate::classifier::ClassifiedMemory, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(reason) = &self.fail_with {
                return Err(ClassifierError::Auth(reason.clone()));
            }
            Ok(crate::classifier::ClassifiedMemory {
                category: "note".to_string(),
                title: "flushed".to_string(),
                subtitle: None,
                narrative: format!("{} events classified", events.len()),
                facts: vec![],
                concepts: vec![],
                files_read: vec![],
                files_modified: vec![],
                confidence: 0.7,
                metadata: None,
            })
        }
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_is_a_noop() {
        let db = Database::new_in_memory().await.unwrap();
        let classifier = StubClassifier { calls: AtomicUsize::new(0), fail_with: None };
        let context = FlushContext { project: Some("proj".to_string()), ..Default::default() };
        let outcome =
            flush_session(&db, &classifier, "sess-1", &context, None, "device-1").await.unwrap();
        assert_eq!(outcome, FlushOutcome { memory_id: None, events_flushed: 0 });
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_flush_writes_one_memory_and_drains_pending() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_raw_event("sess-1", "e1", "tool_call", json!({"a": 1}), 1, 1).await.unwrap();
        db.record_raw_event("sess-1", "e2", "tool_call", json!({"a": 2}), 2, 2).await.unwrap();

        let classifier = StubClassifier { calls: AtomicUsize::new(0), fail_with: None };
        let context = FlushContext { project: Some("proj".to_string()), ..Default::default() };
        let outcome =
            flush_session(&db, &classifier, "sess-1", &context, None, "device-1").await.unwrap();
        assert_eq!(outcome.events_flushed, 2);
        let memory_id = outcome.memory_id.expect("memory written");
        let memory = db.get(memory_id).await.unwrap().expect("memory exists");
        assert_eq!(memory.title, "flushed");

        let still_pending = db.pending_raw_events_for_session("sess-1", None).await.unwrap();
        assert!(still_pending.is_empty());
    }

    #[tokio::test]
    async fn auth_failure_leaves_events_pending_and_bumps_attempts() {
        let db = Database::new_in_memory().await.unwrap();
        db.record_raw_event("sess-1", "e1", "tool_call", json!({}), 1, 1).await.unwrap();

        let classifier =
            StubClassifier { calls: AtomicUsize::new(0), fail_with: Some("token expired".to_string()) };
        let context = FlushContext { project: Some("proj".to_string()), ..Default::default() };
        let err = flush_session(&db, &classifier, "sess-1", &context, None, "device-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Auth(_)));

        let still_pending = db.pending_raw_events_for_session("sess-1", None).await.unwrap();
        assert_eq!(still_pending.len(), 1);
        assert_eq!(still_pending[0].attempt_count, 1);

        let (completed, error, max_attempt) = db.batch_stats_since(24).await.unwrap();
        assert_eq!(completed, 0);
        assert_eq!(error, 1);
        assert_eq!(max_attempt, 1);
    }
}
