//! # quorum-core
//!
//! why: implement the single-node side of raft consensus as a pure, synchronous state machine
//! relations: driven by quorum-server, persisted through quorum-storage
//! what: log entries, log container, election tally, commit counting, roles, node dispatcher

pub mod config;
pub mod election;
pub mod entry;
pub mod error;
pub mod handler;
pub mod log;
pub mod message;
pub mod node;
pub mod persistence;
pub mod replica;
pub mod role;
pub mod timer;
pub mod transport;

use std::collections::BTreeMap;

/// Opaque peer identifier, unique cluster-wide.
pub type NodeId = u64;

/// Logical epoch. At most one leader per term.
pub type Term = u64;

/// 1-based log position. Index 0 is the position before any entry.
pub type Index = u64;

/// Cluster membership: peer id to network address.
pub type Cluster = BTreeMap<NodeId, String>;

pub use config::RaftConfig;
pub use election::{Election, Vote};
pub use entry::LogEntry;
pub use error::{Error, Result};
pub use handler::{Handler, Outcome};
pub use log::LogContainer;
pub use message::{Envelope, RaftMessage};
pub use node::{Collaborators, Node, NodeState};
pub use persistence::{Metadata, Persistence, Snapshot, SnapshotMeta, StoredLog};
pub use replica::ReplicaCounter;
pub use timer::{RandomTimer, Timer};
pub use transport::{Outbox, Outgoing, Transmitter};
