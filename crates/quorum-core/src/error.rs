//! # error
//!
//! why: a single error type for everything the consensus core can fail on
//! relations: returned by node.rs, role/*, persistence.rs implementations
//! what: Error enum, Result alias

use thiserror::Error;

use crate::Index;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures the core does not recover from locally.
///
/// Protocol disagreements (term or log mismatches) are never errors; they are
/// answered with rejection replies. Everything here is either a collaborator
/// failure or a broken internal invariant, and is expected to stop the node.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistence I/O failed.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A log position outside the retained log was read.
    #[error("log index {index} is outside the retained log {first}..={last}")]
    IndexOutOfRange { index: Index, first: Index, last: Index },

    /// A leader tried to overwrite an entry this node already committed.
    #[error("entry {index} conflicts with committed history")]
    CommittedConflict { index: Index },

    /// The application could not produce or restore a snapshot.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// An inbound datagram was not a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),
}
