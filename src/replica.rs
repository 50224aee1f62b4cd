use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::ReplicationError;
use crate::journal::{EventJournal, LogKind};
use crate::scheduler::Scheduler;
use crate::types::{NodeRole, NodeStatus, StoreItem, Version, WalEntry};
use crate::wal::WriteAheadLog;

/// Durable record of the replica's WAL queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicaRecord {
    /// An entry was accepted at the tail of the queue
    Append(WalEntry),

    /// The head of the queue was applied (or discarded as stale)
    Applied { key: String, version: Version },
}

struct ReplicaState {
    status: NodeStatus,
    store: BTreeMap<String, StoreItem>,
    /// Accepted, not yet applied. Consumed strictly head-first.
    queue: VecDeque<WalEntry>,
    /// An apply timer is pending for the head entry
    applying: bool,
    log: Option<WriteAheadLog<ReplicaRecord>>,
}

/// Follower node: durably queues replicated writes and applies them to its
/// store one at a time, in arrival order, after a fixed delay.
pub struct ReplicaNode {
    state: RwLock<ReplicaState>,
    apply_delay: Duration,
    scheduler: Arc<dyn Scheduler>,
    journal: Arc<EventJournal>,
}

impl ReplicaNode {
    pub fn new(
        apply_delay: Duration,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(ReplicaState {
                status: NodeStatus::Online,
                store: BTreeMap::new(),
                queue: VecDeque::new(),
                applying: false,
                log: None,
            }),
            apply_delay,
            scheduler,
            journal,
        })
    }

    /// Open a replica whose WAL queue is persisted at `wal_path`.
    ///
    /// Entries that were accepted but not applied before shutdown are queued
    /// again and the apply loop is resumed. Must be called inside a tokio
    /// runtime when pending entries exist.
    pub fn open(
        wal_path: impl AsRef<Path>,
        apply_delay: Duration,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Result<Arc<Self>> {
        let log = WriteAheadLog::<ReplicaRecord>::open(wal_path, NodeRole::Replica)?;
        let records = log.read_all()?;

        let mut store = BTreeMap::new();
        let mut queue = VecDeque::new();
        for record in records {
            match record {
                ReplicaRecord::Append(entry) => queue.push_back(entry),
                ReplicaRecord::Applied { key, version } => {
                    // Apply is strictly head-first, so a marker for a later
                    // entry means every entry before it was applied too
                    let Some(pos) = queue
                        .iter()
                        .position(|entry| entry.key == key && entry.version == version)
                    else {
                        bail!("Replica WAL applies {key} v{version}, which was never queued");
                    };
                    if pos > 0 {
                        warn!(
                            missing = pos,
                            "Replica WAL lacks apply markers before {key} v{version}"
                        );
                    }
                    for entry in queue.drain(..=pos) {
                        materialize(&mut store, entry);
                    }
                }
            }
        }
        info!(
            n_kvs = store.len(),
            pending = queue.len(),
            "Recovered replica state from WAL"
        );

        let node = Arc::new(Self {
            state: RwLock::new(ReplicaState {
                status: NodeStatus::Online,
                store,
                queue,
                applying: false,
                log: Some(log),
            }),
            apply_delay,
            scheduler,
            journal,
        });
        node.schedule_apply();
        Ok(node)
    }

    /// Append an entry to the WAL queue.
    ///
    /// Rejected only while the node is offline; the transport checks status
    /// before calling, so this is a second line for direct callers.
    pub fn accept_wal_entry(self: &Arc<Self>, entry: WalEntry) -> Result<(), ReplicationError> {
        {
            let mut state = self.write();
            if !state.status.accepts_replication() {
                return Err(ReplicationError::ReplicationUnavailable(state.status));
            }
            if let Some(log) = state.log.as_mut() {
                log.append(&ReplicaRecord::Append(entry.clone()))
                    .context("Failed to persist replica WAL entry")?;
            }
            debug!(key = entry.key, version = entry.version, "Accepted WAL entry");
            self.journal.record(
                NodeRole::Replica,
                LogKind::Wal,
                format!("Persisted to WAL: {} v{}", entry.key, entry.version),
            );
            state.queue.push_back(entry);
        }
        self.schedule_apply();
        Ok(())
    }

    /// Start the apply timer for the head entry unless one is already pending
    fn schedule_apply(self: &Arc<Self>) {
        {
            let mut state = self.write();
            if state.applying || state.queue.is_empty() {
                return;
            }
            state.applying = true;
        }
        let node = Arc::clone(self);
        self.scheduler.after(
            self.apply_delay,
            Box::pin(async move {
                node.apply_head();
                node.schedule_apply();
            }),
        );
    }

    fn apply_head(&self) {
        let mut state = self.write();
        state.applying = false;
        let Some(entry) = state.queue.pop_front() else {
            return;
        };

        if let Some(log) = state.log.as_mut() {
            let record = ReplicaRecord::Applied {
                key: entry.key.clone(),
                version: entry.version,
            };
            if let Err(e) = log.append(&record) {
                error!(key = entry.key, "Failed to persist WAL apply marker: {e:?}");
            }
        }

        let (key, version) = (entry.key.clone(), entry.version);
        if materialize(&mut state.store, entry) {
            self.journal.record(
                NodeRole::Replica,
                LogKind::Success,
                format!("WAL applied to store: {key} v{version}"),
            );
        } else {
            self.journal.record(
                NodeRole::Replica,
                LogKind::Info,
                format!("Discarded stale WAL entry: {key} v{version}"),
            );
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.read().status
    }

    pub fn set_status(&self, status: NodeStatus) {
        let previous = std::mem::replace(&mut self.write().status, status);
        if previous != status {
            info!(%previous, %status, "Replica status changed");
        }
    }

    pub fn get(&self, key: &str) -> Option<StoreItem> {
        self.read().store.get(key).cloned()
    }

    pub fn current_store_snapshot(&self) -> BTreeMap<String, StoreItem> {
        self.read().store.clone()
    }

    /// Accepted entries not yet applied, head first
    pub fn pending_wal(&self) -> Vec<WalEntry> {
        self.read().queue.iter().cloned().collect()
    }

    fn write(&self) -> RwLockWriteGuard<'_, ReplicaState> {
        self.state.write().expect("Failed to lock replica state")
    }

    fn read(&self) -> RwLockReadGuard<'_, ReplicaState> {
        self.state.read().expect("Failed to lock replica state")
    }
}

/// Write an entry into the store unless a newer version is already there
fn materialize(store: &mut BTreeMap<String, StoreItem>, entry: WalEntry) -> bool {
    if let Some(existing) = store.get(&entry.key) {
        if existing.version > entry.version {
            return false;
        }
    }
    store.insert(entry.key.clone(), entry.into_store_item());
    true
}
