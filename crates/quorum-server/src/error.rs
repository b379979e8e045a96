//! # error
//!
//! why: socket, channel and thread failures sit on top of the core's own errors
//! relations: returned by server.rs and client.rs, mapped to an exit code in bin/quorum.rs
//! what: ServerError enum, Result alias

use thiserror::Error;

/// Result type for server and client operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The consensus core or its storage failed.
    #[error(transparent)]
    Core(#[from] quorum_core::Error),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    /// No reply arrived before the client's timeout.
    #[error("no reply from {0} before the timeout")]
    Timeout(String),

    #[error("no node among {0:?} knows a leader")]
    NoLeader(Vec<String>),

    #[error("gave up after {0} redirects")]
    TooManyRedirects(usize),

    #[error("unexpected {0} reply")]
    UnexpectedReply(&'static str),

    /// The cluster answered but refused the request.
    #[error("{0} rejected by the cluster")]
    Rejected(String),
}

impl ServerError {
    /// Process exit code for this failure.
    ///
    /// Collaborator failures inside a running node exit with 2; anything a
    /// client runs into exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(_) | Self::Io(_) | Self::ThreadPanicked(_) => 2,
            _ => 1,
        }
    }
}
