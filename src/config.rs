use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_REPLICA_LATENCY_MS: u64 = 500;
const DEFAULT_WAL_APPLY_DELAY_MS: u64 = 2500;
const DEFAULT_RETRY_TICK_MS: u64 = 1000;
const DEFAULT_RETRY_THRESHOLD_MS: u64 = 3000;
const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;

/// Timing and sizing knobs for a primary/replica pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Simulated round trip from primary to replica
    pub replica_latency_ms: u64,

    /// Delay before the replica applies the head of its WAL
    pub wal_apply_delay_ms: u64,

    /// Retry worker tick interval
    pub retry_tick_ms: u64,

    /// A queued task is redriven only once its last attempt is older than this
    pub retry_threshold_ms: u64,

    /// Attempts after which an alert is raised. Tasks keep retrying regardless.
    pub max_retry_attempts: Option<u32>,

    /// Bound of the in-memory event journal
    pub max_log_entries: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_latency_ms: DEFAULT_REPLICA_LATENCY_MS,
            wal_apply_delay_ms: DEFAULT_WAL_APPLY_DELAY_MS,
            retry_tick_ms: DEFAULT_RETRY_TICK_MS,
            retry_threshold_ms: DEFAULT_RETRY_THRESHOLD_MS,
            max_retry_attempts: None,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
        }
    }
}

impl ReplicationConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs_err::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_tick_ms == 0 {
            bail!("retry_tick_ms must be > 0");
        }
        if self.retry_threshold_ms <= self.retry_tick_ms {
            bail!(
                "retry_threshold_ms ({}) must exceed retry_tick_ms ({})",
                self.retry_threshold_ms,
                self.retry_tick_ms
            );
        }
        if self.max_retry_attempts == Some(0) {
            bail!("max_retry_attempts must be > 0 when set");
        }
        if self.max_log_entries == 0 {
            bail!("max_log_entries must be > 0");
        }
        Ok(())
    }

    pub fn replica_latency(&self) -> Duration {
        Duration::from_millis(self.replica_latency_ms)
    }

    pub fn wal_apply_delay(&self) -> Duration {
        Duration::from_millis(self.wal_apply_delay_ms)
    }

    pub fn retry_tick(&self) -> Duration {
        Duration::from_millis(self.retry_tick_ms)
    }
}
