use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ReplicationError;
use crate::journal::{EventJournal, LogKind};
use crate::replica::ReplicaNode;
use crate::scheduler::Scheduler;
use crate::types::{NodeRole, ReplicationTask, WalEntry};

/// Delivers a replication task from the primary to its replica.
///
/// Resolves `Ok(())` once the replica has accepted the corresponding WAL
/// entry, or `Err(ReplicationUnavailable)` when it could not be reached.
/// Delivery is all-or-nothing.
pub trait ReplicationTransport: Send + Sync + 'static {
    fn send(
        &self,
        task: ReplicationTask,
    ) -> impl Future<Output = Result<(), ReplicationError>> + Send;
}

/// In-process transport with a fixed simulated latency.
///
/// The replica status is read when the latency elapses, not when the send
/// starts, so a status change while a send is in flight is honoured.
pub struct SimulatedTransport {
    replica: Arc<ReplicaNode>,
    latency: Duration,
    scheduler: Arc<dyn Scheduler>,
    journal: Arc<EventJournal>,
}

impl SimulatedTransport {
    pub fn new(
        replica: Arc<ReplicaNode>,
        latency: Duration,
        scheduler: Arc<dyn Scheduler>,
        journal: Arc<EventJournal>,
    ) -> Self {
        Self {
            replica,
            latency,
            scheduler,
            journal,
        }
    }
}

impl ReplicationTransport for SimulatedTransport {
    async fn send(&self, task: ReplicationTask) -> Result<(), ReplicationError> {
        self.scheduler.sleep(self.latency).await;

        let status = self.replica.status();
        if !status.accepts_replication() {
            warn!(key = task.key, version = task.version, %status, "Replica unreachable");
            self.journal.record(
                NodeRole::Primary,
                LogKind::Warn,
                format!("Replication failed for [{}]: replica unreachable", task.key),
            );
            return Err(ReplicationError::ReplicationUnavailable(status));
        }

        let entry = WalEntry::from_task(&task, self.scheduler.now_ms());
        self.replica.accept_wal_entry(entry)?;
        debug!(key = task.key, version = task.version, "Replication acknowledged");
        self.journal.record(
            NodeRole::Primary,
            LogKind::Success,
            format!("Replication ACK received for [{}] v{}", task.key, task.version),
        );
        Ok(())
    }
}
