use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ReplicationError;
use crate::journal::{EventJournal, LogKind};
use crate::retry::RetryQueue;
use crate::scheduler::Scheduler;
use crate::transport::ReplicationTransport;
use crate::types::{NodeRole, ReplicationTask, StoreItem, Version};
use crate::wal::WriteAheadLog;

/// Result of an accepted write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAck {
    pub accepted: bool,
    pub version: Version,
}

struct PrimaryState {
    store: BTreeMap<String, StoreItem>,
    /// Commit log; every committed item is appended before the store changes
    log: Option<WriteAheadLog<StoreItem>>,
}

/// Leader node: the source of truth for values and per-key versions.
///
/// A write is committed locally first and then handed to the transport in
/// the background. Replication failures only ever land in the retry queue.
pub struct PrimaryNode<T: ReplicationTransport> {
    // Store and version counters live behind one lock, which serializes the
    // read-increment-commit of every key
    state: RwLock<PrimaryState>,
    transport: Arc<T>,
    retry_queue: Arc<RetryQueue>,
    scheduler: Arc<dyn Scheduler>,
    journal: Arc<EventJournal>,
}

impl<T: ReplicationTransport> PrimaryNode<T> {
    pub fn new(
        transport: Arc<T>,
        retry_queue: Arc<RetryQueue>,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(PrimaryState {
                store: BTreeMap::new(),
                log: None,
            }),
            transport,
            retry_queue,
            scheduler,
            journal,
        })
    }

    /// Open a primary whose commits are persisted at `wal_path`, rebuilding
    /// the store (and so every key's version) from the existing log.
    pub fn open(
        wal_path: impl AsRef<Path>,
        transport: Arc<T>,
        retry_queue: Arc<RetryQueue>,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Result<Arc<Self>> {
        let log = WriteAheadLog::<StoreItem>::open(wal_path, NodeRole::Primary)?;
        let commits = log.read_all()?;

        let mut store = BTreeMap::new();
        for item in commits {
            store.insert(item.key.clone(), item);
        }
        if !store.is_empty() {
            info!(n_kvs = store.len(), "Recovered primary store from WAL");
        }

        Ok(Arc::new(Self {
            state: RwLock::new(PrimaryState {
                store,
                log: Some(log),
            }),
            transport,
            retry_queue,
            scheduler,
            journal,
        }))
    }

    /// Commit `value` under `key` and start replicating it.
    ///
    /// Returns as soon as the local commit is durable; replication continues
    /// in the background. Must be called inside a tokio runtime.
    pub fn put(
        self: &Arc<Self>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<PutAck, ReplicationError> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            return Err(ReplicationError::InvalidArgument("key must not be empty"));
        }

        self.journal.record(
            NodeRole::Client,
            LogKind::Info,
            format!("PUT /kv/{key} body={{\"value\": \"{value}\"}}"),
        );

        let item = {
            let mut state = self.write();
            let version = state.store.get(&key).map_or(0, |item| item.version) + 1;
            let item = StoreItem::new(key, value, version, self.scheduler.now_ms());

            self.journal.record(
                NodeRole::Primary,
                LogKind::Wal,
                format!("SET {}={} v{version}", item.key, item.value),
            );
            if let Some(log) = state.log.as_mut() {
                log.append(&item)
                    .with_context(|| format!("Failed to commit {} v{version}", item.key))?;
            }
            state.store.insert(item.key.clone(), item.clone());
            self.journal.record(
                NodeRole::Primary,
                LogKind::Wal,
                format!("COMMIT {} v{version}", item.key),
            );
            item
        };

        debug!(key = item.key, version = item.version, "Committed locally");
        self.journal.record(
            NodeRole::Primary,
            LogKind::Success,
            format!("Stored locally: {}", item.key),
        );

        let version = item.version;
        let node = Arc::clone(self);
        let task = ReplicationTask::for_item(&item);
        self.scheduler
            .spawn(Box::pin(async move { node.replicate(task).await }));

        Ok(PutAck {
            accepted: true,
            version,
        })
    }

    async fn replicate(&self, task: ReplicationTask) {
        let (key, version) = (task.key.clone(), task.version);
        match self.transport.send(task.clone()).await {
            Ok(()) => {
                // An older failed write of this key no longer needs redelivery
                self.retry_queue.supersede(&key, version);
            }
            Err(e) => {
                debug!(key, version, "Replication failed: {e}");
                self.retry_queue
                    .enqueue(task.failed_at(self.scheduler.now_ms()));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<StoreItem> {
        self.read().store.get(key).cloned()
    }

    /// Latest committed version of `key`, 0 if never written
    pub fn current_version(&self, key: &str) -> Version {
        self.read().store.get(key).map_or(0, |item| item.version)
    }

    pub fn current_store_snapshot(&self) -> BTreeMap<String, StoreItem> {
        self.read().store.clone()
    }

    fn write(&self) -> RwLockWriteGuard<'_, PrimaryState> {
        self.state.write().expect("Failed to lock primary state")
    }

    fn read(&self) -> RwLockReadGuard<'_, PrimaryState> {
        self.state.read().expect("Failed to lock primary state")
    }
}
