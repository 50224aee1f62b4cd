use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-key write counter. The first accepted write of a key is version 1.
pub type Version = u64;

/// Milliseconds since the Unix epoch, as reported by the active scheduler.
pub type Timestamp = i64;

/// Materialized state of a single key on a node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreItem {
    pub key: String,
    pub value: String,
    pub version: Version,
    pub timestamp: Timestamp,
}

impl StoreItem {
    pub fn new(key: String, value: String, version: Version, timestamp: Timestamp) -> Self {
        Self {
            key,
            value,
            version,
            timestamp,
        }
    }
}

/// A write accepted by the replica but not yet applied to its store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalEntry {
    pub key: String,
    pub value: String,
    pub version: Version,
    /// Arrival time on the replica
    pub timestamp: Timestamp,
}

impl WalEntry {
    pub fn from_task(task: &ReplicationTask, timestamp: Timestamp) -> Self {
        Self {
            key: task.key.clone(),
            value: task.value.clone(),
            version: task.version,
            timestamp,
        }
    }

    pub fn into_store_item(self) -> StoreItem {
        StoreItem::new(self.key, self.value, self.version, self.timestamp)
    }
}

/// Outstanding replication work tracked by the primary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationTask {
    pub key: String,
    pub value: String,
    pub version: Version,
    pub attempts: u32,
    /// 0 means "never attempted" and is always eligible for a redrive
    pub last_attempt: Timestamp,
}

impl ReplicationTask {
    /// A fresh task for a just-committed write, before any attempt
    pub fn for_item(item: &StoreItem) -> Self {
        Self {
            key: item.key.clone(),
            value: item.value.clone(),
            version: item.version,
            attempts: 0,
            last_attempt: 0,
        }
    }

    /// The task as it enters the retry queue after its first failed attempt
    pub fn failed_at(self, now: Timestamp) -> Self {
        Self {
            attempts: 1,
            last_attempt: now,
            ..self
        }
    }

    pub fn is_due(&self, now: Timestamp, threshold_ms: u64) -> bool {
        now.saturating_sub(self.last_attempt) > threshold_ms as i64
    }
}

/// Whether the replica currently accepts replication traffic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    #[default]
    Online,
    Offline,
    /// Reserved; treated like `Online` by the transport
    Degraded,
}

impl NodeStatus {
    pub fn accepts_replication(self) -> bool {
        !matches!(self, NodeStatus::Offline)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Online => "ONLINE",
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Degraded => "DEGRADED",
        };
        f.write_str(name)
    }
}

/// Which side of the pair a log file or journal event belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
    Primary,
    Replica,
    Client,
    System,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Primary => "PRIMARY",
            NodeRole::Replica => "REPLICA",
            NodeRole::Client => "CLIENT",
            NodeRole::System => "SYSTEM",
        };
        f.write_str(name)
    }
}
