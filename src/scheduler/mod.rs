//! Scheduler module for polling targets and recording their status history.

mod clock;

pub use clock::*;

use crate::db::{DbError, HistoryStore, MonitoredTarget, Observation};
use crate::history::{is_consistent, merge, DEFAULT_HISTORY_LIMIT};
use crate::probe::{Prober, DEFAULT_PROBE_TIMEOUT};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Default time between two batches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of probes in flight at once.
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 16;

/// Extra time a prober gets past its own timeout before the scheduler gives up on it.
const PROBE_GRACE: Duration = Duration::from_secs(1);

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to list targets: {0}")]
    Targets(#[source] DbError),
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub history_limit: usize,
    pub max_concurrent_probes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }
}

/// Counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub targets: usize,
    /// Targets whose history was rewritten.
    pub changed: usize,
    pub failed: usize,
}

/// Everything a per-target task needs, cheap to clone.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn HistoryStore>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    probe_deadline: Duration,
    history_limit: usize,
}

impl Worker {
    /// Probe one target and fold the result into its history.
    ///
    /// Returns whether the stored history changed.
    async fn check(&self, target: &MonitoredTarget, lock: &Mutex<()>) -> Result<bool, DbError> {
        let observation = {
            let _permit = self.semaphore.acquire().await.ok();
            match tokio::time::timeout(self.probe_deadline, self.prober.probe(&target.url)).await {
                Ok(obs) => obs,
                Err(_) => {
                    tracing::warn!(
                        "Scheduler: Probe for {} exceeded {:?}, recording offline",
                        target.name,
                        self.probe_deadline
                    );
                    Observation::offline(0)
                }
            }
        };

        // Load, merge and save run without an await point under the target's lock.
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let history = self.store.load_history(target.id)?;
        let previous = history.last().map(|p| (p.status, p.status_code));
        let merged = merge(history.clone(), &observation, now, self.history_limit);
        debug_assert!(is_consistent(&merged));

        if merged == history {
            return Ok(false);
        }
        self.store.save_history(target.id, &merged)?;

        if previous != Some((observation.status, observation.status_code)) {
            tracing::info!(
                "Scheduler: {} is {} ({})",
                target.name,
                observation.status,
                observation.status_code
            );
        }
        Ok(true)
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodically probes every registered target.
///
/// The scheduler is the only writer of status histories. Checks of different
/// targets run concurrently; checks of the same target are serialized.
pub struct Scheduler {
    worker: Worker,
    interval: Duration,
    locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    /// Create a scheduler using the system clock.
    pub fn new(store: Arc<dyn HistoryStore>, prober: Arc<dyn Prober>, config: SchedulerConfig) -> Self {
        let deadline = config.probe_timeout + PROBE_GRACE.min(config.probe_timeout);
        Self {
            worker: Worker {
                store,
                prober,
                clock: Arc::new(SystemClock),
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_probes.max(1))),
                probe_deadline: deadline,
                history_limit: config.history_limit.max(1),
            },
            interval: config.interval,
            locks: std::sync::Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Replace the clock used to timestamp observations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.worker.clock = clock;
        self
    }

    /// Start the polling loop. Does nothing if it is already running.
    ///
    /// The first batch runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });

        *running = Some(Running { shutdown_tx, handle });
        tracing::info!("Scheduler: Started, polling every {:?}", self.interval);
    }

    /// Stop the polling loop, letting an in-flight batch finish first.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!("Scheduler: Polling task ended abnormally: {}", e);
        }
        tracing::info!("Scheduler: Stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(summary) => tracing::debug!(
                            "Scheduler: Checked {} targets, {} changed, {} failed",
                            summary.targets,
                            summary.changed,
                            summary.failed
                        ),
                        Err(e) => tracing::error!("Scheduler: Batch skipped: {}", e),
                    }
                }
            }
        }
    }

    /// Run one batch over a snapshot of all targets.
    ///
    /// Only a failure to list targets fails the batch; per-target failures are
    /// logged and counted.
    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        let targets = self
            .worker
            .store
            .list_targets()
            .map_err(SchedulerError::Targets)?;

        let mut summary = TickSummary {
            targets: targets.len(),
            ..Default::default()
        };

        let locks = self.target_locks(&targets);
        let mut tasks = JoinSet::new();
        for (target, lock) in targets.into_iter().zip(locks) {
            let worker = self.worker.clone();
            tasks.spawn(async move {
                let result = worker.check(&target, &lock).await;
                (target.name, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => summary.changed += 1,
                Ok((_, Ok(false))) => {}
                Ok((name, Err(e))) => {
                    summary.failed += 1;
                    tracing::error!("Scheduler: Failed to update {}: {}", name, e);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!("Scheduler: Check task failed: {}", e);
                }
            }
        }

        Ok(summary)
    }

    /// Per-target locks for this snapshot; idle locks of vanished targets are dropped.
    fn target_locks(&self, targets: &[MonitoredTarget]) -> Vec<Arc<Mutex<()>>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A lock still shared with a running check stays, even if its target vanished
        // from this snapshot, so a target never ends up with two locks.
        let ids: HashSet<i64> = targets.iter().map(|t| t.id).collect();
        locks.retain(|id, lock| ids.contains(id) || Arc::strong_count(lock) > 1);

        targets
            .iter()
            .map(|t| locks.entry(t.id).or_default().clone())
            .collect()
    }
}
