use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::ReplicationConfig;
use crate::journal::{EventJournal, LogKind};
use crate::scheduler::Scheduler;
use crate::transport::ReplicationTransport;
use crate::types::{NodeRole, ReplicationTask, Timestamp, Version};

/// Replication tasks awaiting redelivery, in insertion order.
///
/// Holds at most one task per key; the newest version of a key always wins.
pub struct RetryQueue {
    tasks: Mutex<VecDeque<ReplicationTask>>,
    journal: Arc<EventJournal>,
}

impl RetryQueue {
    pub fn new(journal: Arc<EventJournal>) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            journal,
        }
    }

    /// Queue a failed task, replacing any older task for the same key.
    ///
    /// Returns false if a newer version of the key is already queued, in
    /// which case `task` is dropped.
    pub fn enqueue(&self, task: ReplicationTask) -> bool {
        let mut tasks = self.lock();
        if let Some(pos) = tasks.iter().position(|queued| queued.key == task.key) {
            if tasks[pos].version > task.version {
                debug!(
                    key = task.key,
                    version = task.version,
                    queued = tasks[pos].version,
                    "Dropping stale retry task"
                );
                return false;
            }
            tasks.remove(pos);
        }
        self.journal.record(
            NodeRole::Primary,
            LogKind::Error,
            format!("Added [{}] v{} to retry queue", task.key, task.version),
        );
        tasks.push_back(task);
        true
    }

    /// Drop the queued task for `key` if `version` already reached the replica
    pub fn supersede(&self, key: &str, version: Version) -> bool {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|task| task.key != key || task.version > version);
        let removed = tasks.len() != before;
        if removed {
            debug!(key, version, "Superseded queued retry task");
        }
        removed
    }

    /// First task in queue order whose last attempt is older than `threshold_ms`
    pub fn next_due(&self, now: Timestamp, threshold_ms: u64) -> Option<ReplicationTask> {
        self.lock()
            .iter()
            .find(|task| task.is_due(now, threshold_ms))
            .cloned()
    }

    /// Record a failed redrive; returns the new attempt count if the task
    /// is still queued at that version
    pub fn record_failure(&self, key: &str, version: Version, now: Timestamp) -> Option<u32> {
        let mut tasks = self.lock();
        let task = tasks
            .iter_mut()
            .find(|task| task.key == key && task.version == version)?;
        task.attempts += 1;
        task.last_attempt = now;
        Some(task.attempts)
    }

    /// Make every queued task immediately eligible. Returns how many were reset.
    pub fn force_retry_all(&self) -> usize {
        let mut tasks = self.lock();
        if tasks.is_empty() {
            return 0;
        }
        for task in tasks.iter_mut() {
            task.last_attempt = 0;
        }
        self.journal.record(
            NodeRole::System,
            LogKind::Warn,
            format!("Manual sync triggered for {} queued task(s)", tasks.len()),
        );
        tasks.len()
    }

    pub fn snapshot(&self) -> Vec<ReplicationTask> {
        self.lock().iter().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<ReplicationTask> {
        self.lock().iter().find(|task| task.key == key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ReplicationTask>> {
        self.tasks.lock().expect("Failed to lock retry queue")
    }
}

/// What a single worker tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedriveOutcome {
    Delivered { key: String, version: Version },
    Failed { key: String, version: Version, attempts: u32 },
}

/// Holds the worker's in-flight flag for the duration of one redrive
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodically redrives the oldest eligible task in a `RetryQueue`.
pub struct RetryWorker<T: ReplicationTransport> {
    queue: Arc<RetryQueue>,
    transport: Arc<T>,
    scheduler: Arc<dyn Scheduler>,
    journal: Arc<EventJournal>,
    tick_interval: Duration,
    threshold_ms: u64,
    max_attempts: Option<u32>,
    in_flight: AtomicBool,
}

impl<T: ReplicationTransport> RetryWorker<T> {
    pub fn new(
        config: &ReplicationConfig,
        queue: Arc<RetryQueue>,
        transport: Arc<T>,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Self {
        Self {
            queue,
            transport,
            scheduler,
            journal,
            tick_interval: config.retry_tick(),
            threshold_ms: config.retry_threshold_ms,
            max_attempts: config.max_retry_attempts,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run ticks until `shutdown` turns true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.tick_interval, "Retry worker started");
        let mut ticker = self.scheduler.interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Retry worker stopped");
    }

    /// Redrive at most one eligible task.
    ///
    /// Returns `None` when nothing was due or another tick is still running.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Option<RedriveOutcome> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        self.redrive_next().await
    }

    async fn redrive_next(&self) -> Option<RedriveOutcome> {
        let task = self
            .queue
            .next_due(self.scheduler.now_ms(), self.threshold_ms)?;
        let (key, version) = (task.key.clone(), task.version);

        self.journal.record(
            NodeRole::System,
            LogKind::Info,
            format!("RetryWorker: processing {key} (attempt {})", task.attempts + 1),
        );

        match self.transport.send(task).await {
            Ok(()) => {
                self.queue.supersede(&key, version);
                self.journal.record(
                    NodeRole::System,
                    LogKind::Success,
                    format!("RetryWorker: sync successful for {key}"),
                );
                Some(RedriveOutcome::Delivered { key, version })
            }
            Err(e) => {
                let now = self.scheduler.now_ms();
                let Some(attempts) = self.queue.record_failure(&key, version, now) else {
                    debug!(key, version, "Retry task superseded during redrive");
                    return None;
                };
                warn!(key, version, attempts, "Retry failed: {e}");
                self.journal.record(
                    NodeRole::System,
                    LogKind::Warn,
                    format!("RetryWorker: retry failed for {key} attempts={attempts}"),
                );
                if self.max_attempts == Some(attempts) {
                    self.journal.record(
                        NodeRole::System,
                        LogKind::Error,
                        format!(
                            "RetryWorker: {key} v{version} reached {attempts} attempts; still retrying"
                        ),
                    );
                }
                Some(RedriveOutcome::Failed {
                    key,
                    version,
                    attempts,
                })
            }
        }
    }
}
