use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ReplicationConfig;
use crate::error::ReplicationError;
use crate::journal::{EventJournal, LogEntry, LogKind};
use crate::primary::{PrimaryNode, PutAck};
use crate::replica::ReplicaNode;
use crate::retry::{RedriveOutcome, RetryQueue, RetryWorker};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transport::SimulatedTransport;
use crate::types::{NodeRole, NodeStatus, ReplicationTask, StoreItem, WalEntry};

const PRIMARY_WAL_FILE: &str = "primary.wal";
const REPLICA_WAL_FILE: &str = "replica.wal";

/// Read-only view of the whole pair, for display and monitoring
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub primary: BTreeMap<String, StoreItem>,
    pub replica: BTreeMap<String, StoreItem>,
    pub replica_status: NodeStatus,
    pub retry_queue: Vec<ReplicationTask>,
    pub wal: Vec<WalEntry>,
    pub consistent: bool,
}

impl SystemSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize system snapshot")
    }
}

/// A primary, its replica and the retry machinery between them
pub struct Cluster {
    primary: Arc<PrimaryNode<SimulatedTransport>>,
    replica: Arc<ReplicaNode>,
    retry_queue: Arc<RetryQueue>,
    worker: Arc<RetryWorker<SimulatedTransport>>,
    journal: Arc<EventJournal>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    /// In-memory pair driven by the tokio clock
    pub fn new(config: ReplicationConfig) -> Result<Self> {
        Self::with_scheduler(config, Arc::new(TokioScheduler::new()), None)
    }

    /// Pair whose primary commits and replica WAL are persisted under `data_dir`
    pub fn open(config: ReplicationConfig, data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_scheduler(
            config,
            Arc::new(TokioScheduler::new()),
            Some(data_dir.as_ref()),
        )
    }

    pub fn with_scheduler(
        config: ReplicationConfig,
        scheduler: Arc<dyn Scheduler>,
        data_dir: Option<&Path>,
    ) -> Result<Self> {
        config.validate()?;
        let journal = Arc::new(EventJournal::new(
            config.max_log_entries,
            scheduler.clone(),
        ));

        let replica = match data_dir {
            Some(dir) => {
                fs_err::create_dir_all(dir)?;
                ReplicaNode::open(
                    dir.join(REPLICA_WAL_FILE),
                    config.wal_apply_delay(),
                    scheduler.clone(),
                    journal.clone(),
                )?
            }
            None => ReplicaNode::new(config.wal_apply_delay(), scheduler.clone(), journal.clone()),
        };

        let transport = Arc::new(SimulatedTransport::new(
            replica.clone(),
            config.replica_latency(),
            scheduler.clone(),
            journal.clone(),
        ));
        let retry_queue = Arc::new(RetryQueue::new(journal.clone()));

        let primary = match data_dir {
            Some(dir) => PrimaryNode::open(
                dir.join(PRIMARY_WAL_FILE),
                transport.clone(),
                retry_queue.clone(),
                scheduler.clone(),
                journal.clone(),
            )?,
            None => PrimaryNode::new(
                transport.clone(),
                retry_queue.clone(),
                scheduler.clone(),
                journal.clone(),
            ),
        };

        let worker = Arc::new(RetryWorker::new(
            &config,
            retry_queue.clone(),
            transport,
            scheduler,
            journal.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            primary,
            replica,
            retry_queue,
            worker,
            journal,
            shutdown,
        })
    }

    /// Spawn the retry worker loop. It runs until `shutdown`.
    pub fn start(&self) -> JoinHandle<()> {
        let worker = self.worker.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(worker.run(shutdown))
    }

    pub fn shutdown(&self) {
        info!("Shutting down cluster");
        let _ = self.shutdown.send(true);
    }

    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<PutAck, ReplicationError> {
        self.primary.put(key, value)
    }

    /// Fault injection: mark the replica reachable or unreachable
    pub fn set_replica_status(&self, status: NodeStatus) {
        if self.replica.status() == status {
            return;
        }
        self.replica.set_status(status);
        self.journal.record(
            NodeRole::System,
            LogKind::Warn,
            format!("Replica set to {status}"),
        );
    }

    /// True when no write is waiting for redelivery
    pub fn is_consistent(&self) -> bool {
        self.retry_queue.is_empty()
    }

    /// Make every queued task eligible on the next tick
    pub fn force_retry_all(&self) -> usize {
        self.retry_queue.force_retry_all()
    }

    /// Run one retry tick immediately, outside the worker loop's schedule
    pub async fn retry_tick(&self) -> Option<RedriveOutcome> {
        self.worker.tick().await
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        let retry_queue = self.retry_queue.snapshot();
        SystemSnapshot {
            primary: self.primary.current_store_snapshot(),
            replica: self.replica.current_store_snapshot(),
            replica_status: self.replica.status(),
            consistent: retry_queue.is_empty(),
            retry_queue,
            wal: self.replica.pending_wal(),
        }
    }

    pub fn journal(&self) -> Vec<LogEntry> {
        self.journal.snapshot()
    }

    pub fn primary(&self) -> &Arc<PrimaryNode<SimulatedTransport>> {
        &self.primary
    }

    pub fn replica(&self) -> &Arc<ReplicaNode> {
        &self.replica
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }
}
