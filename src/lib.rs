//! replikv - the write path of a leader-follower key-value store
//!
//! A primary node accepts writes, commits them locally and replicates them
//! asynchronously to a replica, which queues each write in a write-ahead log
//! (WAL) and applies it to its readable store after a fixed delay. Writes
//! that cannot be delivered wait in a retry queue until the replica is
//! reachable again.
//!
//! # Key Features
//!
//! - **Local durability first**: a write is committed on the primary before any replication attempt
//! - **Monotonic versions**: every accepted write bumps its key's version by exactly one
//! - **FIFO apply**: the replica applies its WAL strictly head-first, one entry at a time
//! - **Eventual convergence**: failed deliveries are redriven until they succeed
//! - **Deterministic time**: all delays go through a [`scheduler::Scheduler`]
//! - **Optional persistence**: checksummed on-disk logs for both nodes
//!
//! # Quick Start
//!
//! ```rust
//! use replikv::{Cluster, NodeStatus, ReplicationConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let cluster = Cluster::new(ReplicationConfig::default())?;
//! let _worker = cluster.start();
//!
//! let ack = cluster.put("a", "1")?;
//! assert_eq!(ack.version, 1);
//!
//! cluster.set_replica_status(NodeStatus::Offline);
//! cluster.put("b", "2")?;
//! # cluster.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! The core types you'll work with:
//! - [`Cluster`] - wires a primary, a replica and the retry worker together
//! - [`primary::PrimaryNode`] - the sole write entry point
//! - [`replica::ReplicaNode`] - WAL queue and delayed apply loop
//! - [`retry::RetryQueue`] / [`retry::RetryWorker`] - redelivery of failed writes
//! - [`transport::ReplicationTransport`] - the seam between the two nodes

pub mod cluster;
pub mod config;
pub mod error;
pub mod journal;
pub mod primary;
pub mod replica;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod types;
pub mod wal;

pub use cluster::{Cluster, SystemSnapshot};
pub use config::ReplicationConfig;
pub use error::ReplicationError;
pub use types::{NodeStatus, ReplicationTask, StoreItem, WalEntry};
