//! # persistence
//!
//! why: the core must not depend on any particular on-disk format
//! relations: implemented by quorum-storage, called from node.rs on every durable mutation
//! what: Persistence trait, Metadata, Snapshot, SnapshotMeta

use serde::{Deserialize, Serialize};

use crate::entry::LogEntry;
use crate::error::Result;
use crate::{Cluster, Index, NodeId, Term};

/// Term, vote and membership: the small state that must survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    /// Membership in effect, as of the last config entry in the log.
    pub cluster: Cluster,
    /// Membership at the snapshot boundary, used when the retained log holds
    /// no config entry. Absent means the same as `cluster`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_cluster: Option<Cluster>,
}

/// Position of the last entry folded into a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: Index,
    pub last_included_term: Term,
}

/// Opaque application state plus the log position it reflects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub last_included_index: Index,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn new(meta: SnapshotMeta, data: Vec<u8>) -> Self {
        Self {
            last_included_index: meta.last_included_index,
            last_included_term: meta.last_included_term,
            data,
        }
    }

    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            last_included_index: self.last_included_index,
            last_included_term: self.last_included_term,
        }
    }
}

/// The retained log suffix as written to storage.
///
/// Recording where the suffix starts lets a restart line it up with the
/// snapshot even if the process died between saving one and the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLog {
    pub first_index: Index,
    pub entries: Vec<LogEntry>,
}

impl Default for StoredLog {
    fn default() -> Self {
        Self {
            first_index: 1,
            entries: Vec::new(),
        }
    }
}

/// Durable storage for one node.
///
/// The log handed to `save_log_entries` is always the retained suffix after
/// the current snapshot, never the full history.
pub trait Persistence {
    fn read_metadata(&self) -> Result<Metadata>;

    fn read_log_entries(&self) -> Result<StoredLog>;

    fn read_snapshot(&self) -> Result<Snapshot>;

    fn save_metadata(&mut self, metadata: &Metadata) -> Result<()>;

    fn save_log_entries(&mut self, first_index: Index, entries: &[LogEntry]) -> Result<()>;

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;
}
