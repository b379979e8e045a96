//! # entry
//!
//! why: model the three kinds of record the replicated log carries
//! relations: stored by log.rs, shipped inside message.rs, persisted via persistence.rs
//! what: LogEntry enum (command, query, config) and its classification helpers

use serde::{Deserialize, Serialize};

use crate::{Cluster, Term};

/// A single immutable record in the replicated log.
///
/// Position is implied by where the entry sits in the log, so entries carry
/// only the term they were created in plus their payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// A state machine command. An absent payload is a no-op marker.
    Command {
        term: Term,
        command: Option<String>,
        client: Option<String>,
    },
    /// A read request logged so that it is answered in log order.
    Query {
        term: Term,
        query: String,
        client: String,
    },
    /// The full membership after a join or leave.
    Config { term: Term, cluster: Cluster },
}

impl LogEntry {
    /// The no-op a fresh leader appends to anchor its own term.
    pub fn noop(term: Term) -> Self {
        Self::Command {
            term,
            command: None,
            client: None,
        }
    }

    pub fn command(term: Term, command: impl Into<String>, client: impl Into<String>) -> Self {
        Self::Command {
            term,
            command: Some(command.into()),
            client: Some(client.into()),
        }
    }

    pub fn query(term: Term, query: impl Into<String>, client: impl Into<String>) -> Self {
        Self::Query {
            term,
            query: query.into(),
            client: client.into(),
        }
    }

    pub fn config(term: Term, cluster: Cluster) -> Self {
        Self::Config { term, cluster }
    }

    /// The term this entry was created in.
    pub fn term(&self) -> Term {
        match self {
            Self::Command { term, .. } | Self::Query { term, .. } | Self::Config { term, .. } => {
                *term
            }
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Command { command: None, .. })
    }

    /// The membership carried by a config entry.
    pub fn cluster(&self) -> Option<&Cluster> {
        match self {
            Self::Config { cluster, .. } => Some(cluster),
            _ => None,
        }
    }
}
