//! # config
//!
//! why: keep timing and sizing knobs in one serializable place
//! relations: read by timer.rs (timeouts), role/leader.rs (batching), node.rs (compaction)
//! what: RaftConfig with defaults

use serde::{Deserialize, Serialize};

/// Tunables for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout, in milliseconds.
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout, in milliseconds.
    pub election_timeout_max: u64,
    /// Interval between ticks (and therefore leader heartbeats), in milliseconds.
    pub heartbeat_interval: u64,
    /// Maximum number of entries carried by one AppendEntries.
    pub max_append_entries: usize,
    /// Applied entries retained before the log is compacted into a snapshot.
    pub max_log_entries: u64,
    /// Route client queries through the log instead of reading local state.
    pub linearizable_reads: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_append_entries: 16,
            max_log_entries: 128,
            linearizable_reads: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RaftConfig = serde_json::from_str(r#"{"max_log_entries": 4}"#).unwrap();
        assert_eq!(config.max_log_entries, 4);
        assert_eq!(config.max_append_entries, 16);
        assert_eq!(config.election_timeout_min, 150);
        assert!(!config.linearizable_reads);
    }
}
