use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::scheduler::Scheduler;
use crate::types::{NodeRole, Timestamp};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Info,
    Warn,
    Error,
    Success,
    Wal,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogKind::Info => "INFO",
            LogKind::Warn => "WARN",
            LogKind::Error => "ERROR",
            LogKind::Success => "SUCCESS",
            LogKind::Wal => "WAL",
        };
        f.write_str(name)
    }
}

/// One observable event in the life of a write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub node: NodeRole,
    pub kind: LogKind,
    pub message: String,
}

struct JournalState {
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

/// Bounded, ordered event log shared by every component of a cluster.
///
/// Each record is mirrored to `tracing`; the buffered copy is what display
/// and monitoring collaborators read. Oldest entries are dropped first.
pub struct EventJournal {
    state: Mutex<JournalState>,
    max_entries: usize,
    scheduler: Arc<dyn Scheduler>,
}

impl EventJournal {
    pub fn new(max_entries: usize, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: Mutex::new(JournalState {
                next_seq: 1,
                entries: VecDeque::new(),
            }),
            max_entries,
            scheduler,
        }
    }

    pub fn record(&self, node: NodeRole, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            LogKind::Wal => debug!(%node, "{message}"),
            LogKind::Info | LogKind::Success => info!(%node, %kind, "{message}"),
            LogKind::Warn => warn!(%node, "{message}"),
            LogKind::Error => error!(%node, "{message}"),
        }

        let timestamp = self.scheduler.now_ms();
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push_back(LogEntry {
            seq,
            timestamp,
            node,
            kind,
            message,
        });
        while state.entries.len() > self.max_entries {
            state.entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Entries emitted by one node, oldest first
    pub fn for_node(&self, node: NodeRole) -> Vec<LogEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.node == node)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().expect("Failed to lock event journal")
    }
}
