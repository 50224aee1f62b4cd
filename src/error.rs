use thiserror::Error;

use crate::types::NodeStatus;

/// Errors surfaced by the replication core.
///
/// Only `InvalidArgument` (and `Storage`, when a durable log is configured)
/// ever reaches a caller of `put`; `ReplicationUnavailable` is absorbed by
/// the retry queue.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("replica unavailable: node is {0}")]
    ReplicationUnavailable(NodeStatus),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T, E = ReplicationError> = std::result::Result<T, E>;
