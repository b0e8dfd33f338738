//! The idle sweeper (§4.9): a periodic tick that purges stale raw events,
//! marks batches stuck in `pending` as `error`, and flushes sessions that
//! either have queued work or have gone idle — in that order. Classifier
//! auth failures freeze all flush work for a cooldown window instead of
//! retrying every tick.
//!
//! Grounded in the original's `RawEventSweeper` tick loop; the auth-backoff
//! timestamp is an explicit field on this struct rather than an ambient
//! global, per §9 "Process-wide state... encapsulate each in an explicit
//! handle."

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codemem_core::RawEventsConfig;
use codemem_db::Database;
use tokio::sync::Mutex;
use tracing::warn;

use crate::classifier::{Classifier, ClassifierError, FlushContext};
use crate::flush::flush_session;

/// §4.9: "the sweeper backs off all flush work for 5 minutes" on a
/// classifier auth error.
const CLASSIFIER_AUTH_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Outcome of one sweep tick, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepOutcome {
    pub purged_events: u64,
    pub stuck_batches_marked: u64,
    pub sessions_attempted: u64,
    pub sessions_flushed: u64,
    pub auth_backoff_active: bool,
}

pub struct Sweeper {
    db: Arc<Database>,
    classifier: Arc<dyn Classifier>,
    device_id: String,
    config: RawEventsConfig,
    auth_backoff_until: Mutex<Option<Instant>>,
}

impl Sweeper {
    pub fn new(
        db: Arc<Database>,
        classifier: Arc<dyn Classifier>,
        device_id: String,
        config: RawEventsConfig,
    ) -> Self {
        Self { db, classifier, device_id, config, auth_backoff_until: Mutex::new(None) }
    }

    /// Run one sweep: purge → mark-stuck → flush-pending → flush-idle
    /// (§4.9 steps 1-4). Steps 3/4 are skipped entirely while a classifier
    /// auth backoff from a prior tick is still active.
    pub async fn tick(&self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        match self.db.purge_events_older_than(self.config.retention).await {
            Ok(n) => outcome.purged_events = n,
            Err(err) => warn!(error = %err, "sweeper: failed to purge raw events"),
        }

        match self.db.mark_stuck_batches(self.config.stuck_batch.as_millis() as i64).await {
            Ok(n) => outcome.stuck_batches_marked = n,
            Err(err) => warn!(error = %err, "sweeper: failed to mark stuck batches"),
        }

        if self.auth_backoff_active().await {
            outcome.auth_backoff_active = true;
            return outcome;
        }

        let pending = self
            .db
            .sessions_with_pending_work(self.config.sweeper_limit as i64)
            .await
            .unwrap_or_default();
        let idle = self
            .db
            .idle_sessions(
                self.config.sweeper_idle.as_millis() as i64,
                self.config.sweeper_limit as i64,
            )
            .await
            .unwrap_or_default();

        let mut seen: HashSet<String> = HashSet::new();
        for session_id in pending.into_iter().chain(idle) {
            if !seen.insert(session_id.clone()) {
                continue;
            }
            outcome.sessions_attempted += 1;

            match flush_session(
                &self.db,
                self.classifier.as_ref(),
                &session_id,
                &FlushContext::default(),
                self.config.worker_max_events,
                &self.device_id,
            )
            .await
            {
                Ok(result) if result.memory_id.is_some() => outcome.sessions_flushed += 1,
                Ok(_) => {}
                Err(ClassifierError::Auth(reason)) => {
                    self.enter_auth_backoff(&reason).await;
                    outcome.auth_backoff_active = true;
                    break;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "sweeper: flush failed");
                }
            }
        }

        outcome
    }

    async fn auth_backoff_active(&self) -> bool {
        let guard = self.auth_backoff_until.lock().await;
        matches!(*guard, Some(until) if Instant::now() < until)
    }

    /// Enter (or extend) the backoff window, logging only on the
    /// transition into backoff — "logs once per backoff window" (§4.9).
    async fn enter_auth_backoff(&self, reason: &str) {
        let mut guard = self.auth_backoff_until.lock().await;
        let already_active = matches!(*guard, Some(until) if Instant::now() < until);
        *guard = Some(Instant::now() + CLASSIFIER_AUTH_BACKOFF);
        if !already_active {
            warn!(reason, "classifier auth failure: freezing flush work for 5 minutes");
        }
    }
}
