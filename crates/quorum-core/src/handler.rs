//! # handler
//!
//! why: the replicated log is only useful once committed commands reach an application
//! relations: called by the roles when entries are applied; snapshots taken from node.rs
//! what: Handler trait and the Outcome it returns

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::persistence::{Snapshot, SnapshotMeta};

/// Result of running a command or query against application state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Outcome {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// The application state machine fed by committed entries.
pub trait Handler {
    /// Apply a committed command.
    fn on_command(&mut self, command: &str) -> Outcome;

    /// Answer a read against current state.
    fn on_query(&mut self, query: &str) -> Outcome;

    /// Serialize current state, remembering `meta` as the new boundary.
    fn take_snapshot(&mut self, meta: SnapshotMeta) -> Result<Vec<u8>>;

    /// Replace current state with a snapshot, remembering its boundary.
    fn restore(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// The boundary of the snapshot this state was last taken at or restored from.
    fn last_included(&self) -> SnapshotMeta;
}
