//! Background task wiring (§4.8, §4.9): the auto-flusher's debounce timers
//! run themselves once notified, but the sweeper and the sync scheduler
//! need a periodic driver. `DaemonHandle` owns those two `tokio::spawn`
//! loops and aborts them on drop, mirroring `claude-view-relay`'s
//! `RelayDaemon` lifecycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codemem_db::{Database, RawEvent};
use codemem_ingest::{flush_session, Classifier, ClassifiedMemory, ClassifierError, FlushContext, Sweeper};
use codemem_sync::{run_daemon_tick, DeviceIdentity, NullDiscovery, PeerDiscovery};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A classifier that always fails: the default when no real classifier is
/// configured. Matches the original's behavior of running the sweeper
/// against raw events even before a classifier provider is wired up,
/// surfacing the absence as an ordinary (non-auth) flush failure rather
/// than silently dropping events.
pub struct NullClassifier;

#[async_trait]
impl Classifier for NullClassifier {
    async fn classify(
        &self,
        _session: &str,
        _events: &[RawEvent],
        _context: &FlushContext,
    ) -> Result<ClassifiedMemory, ClassifierError> {
        Err(ClassifierError::Other("no classifier configured".to_string()))
    }
}

/// Owns the background sweeper and sync-scheduler loops. Dropping this
/// handle aborts both tasks; there is no graceful drain since a sweep/sync
/// tick is cheap to re-run from scratch on the next process start.
pub struct DaemonHandle {
    sweeper_task: Option<JoinHandle<()>>,
    sync_task: Option<JoinHandle<()>>,
}

impl DaemonHandle {
    /// Spawn the idle sweeper loop, ticking every `interval` and skipping
    /// entirely when `config.sweeper_enabled` is false.
    pub fn spawn_sweeper(sweeper: Arc<Sweeper>, interval: Duration, enabled: bool) -> Self {
        let sweeper_task = if enabled {
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let outcome = sweeper.tick().await;
                    if outcome.sessions_flushed > 0 || outcome.purged_events > 0 {
                        info!(
                            flushed = outcome.sessions_flushed,
                            purged = outcome.purged_events,
                            stuck = outcome.stuck_batches_marked,
                            "sweeper tick"
                        );
                    }
                }
            }))
        } else {
            None
        };
        Self { sweeper_task, sync_task: None }
    }

    /// Spawn the sync scheduler loop: one `run_daemon_tick` per `interval`,
    /// sequential across peers, logging failures without aborting the loop.
    pub fn spawn_sync(
        db: Arc<Database>,
        identity: Arc<DeviceIdentity>,
        discovery: Arc<dyn PeerDiscovery>,
        http: reqwest::Client,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match run_daemon_tick(&db, &identity, discovery.as_ref(), &http).await {
                    Ok(outcome) => {
                        if !outcome.failed.is_empty() {
                            warn!(failed = ?outcome.failed, "sync tick had failures");
                        }
                    }
                    Err(err) => warn!(error = %err, "sync tick failed"),
                }
            }
        })
    }

    /// Combine a sweeper loop and a sync loop into one handle.
    pub fn spawn(
        sweeper: Arc<Sweeper>,
        sweeper_interval: Duration,
        sweeper_enabled: bool,
        db: Arc<Database>,
        identity: Arc<DeviceIdentity>,
        sync_interval: Duration,
    ) -> Self {
        let mut handle = Self::spawn_sweeper(sweeper, sweeper_interval, sweeper_enabled);
        handle.sync_task =
            Some(Self::spawn_sync(db, identity, Arc::new(NullDiscovery), reqwest::Client::new(), sync_interval));
        handle
    }

    /// Run one flush for `session_id` immediately, outside of the sweeper's
    /// normal idle/pending schedule — used by `raw-events-gate` and manual
    /// CLI flush invocations.
    pub async fn flush_now(
        db: &Database,
        classifier: &dyn Classifier,
        session_id: &str,
        device_id: &str,
    ) -> Result<codemem_ingest::FlushOutcome, ClassifierError> {
        flush_session(db, classifier, session_id, &FlushContext::default(), None, device_id).await
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper_task.take() {
            task.abort();
        }
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_classifier_always_errors() {
        let classifier = NullClassifier;
        let result = classifier.classify("s1", &[], &FlushContext::default()).await;
        assert!(matches!(result, Err(ClassifierError::Other(_))));
    }

    #[tokio::test]
    async fn disabled_sweeper_spawns_no_task() {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        let sweeper = Arc::new(Sweeper::new(
            db,
            Arc::new(NullClassifier),
            "local".to_string(),
            codemem_core::RawEventsConfig::default(),
        ));
        let handle = DaemonHandle::spawn_sweeper(sweeper, Duration::from_secs(30), false);
        assert!(handle.sweeper_task.is_none());
    }
}
