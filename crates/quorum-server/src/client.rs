//! # client
//!
//! why: clients only know some node addresses, not which node currently leads
//! relations: speaks the wire format of quorum_core::message to nodes run by server.rs
//! what: Client with leader discovery, commands, queries, membership requests and redirects

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use quorum_core::message::{ClientCommand, ClientQuery, CommandResponse, QueryResponse, LEADER_QUERY};
use quorum_core::{Envelope, NodeId, RaftMessage};
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::{is_timeout, is_unreachable, MAX_DATAGRAM_LEN};

/// How long to wait for any single reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirects followed before giving up on a request.
pub const MAX_REDIRECTS: usize = 3;

enum Reply<T> {
    Done(T),
    Redirect(String),
}

/// Talks to a cluster over udp.
///
/// Every request starts by asking all known nodes who leads, then goes to
/// that leader. A node that is not the leader answers with `redirect_to`,
/// which is followed up to `max_redirects` times.
#[derive(Debug, Clone)]
pub struct Client {
    nodes: Vec<String>,
    timeout: Duration,
    max_redirects: usize,
}

impl Client {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            max_redirects: MAX_REDIRECTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Ask every known node who leads. The first answer naming a leader wins.
    pub fn leader(&self) -> Result<(NodeId, String)> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let request = Envelope::anonymous(RaftMessage::Query(ClientQuery::new(LEADER_QUERY, "")))
            .encode()?;
        for node in &self.nodes {
            debug!(node = %node, "asking for leader");
            if let Err(e) = socket.send_to(&request, node.as_str()) {
                warn!(node = %node, error = %e, "could not reach node");
            }
        }

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let mut answered = 0;
        while answered < self.nodes.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;

            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if is_timeout(&e) => break,
                Err(e) if is_unreachable(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let Some(envelope) = Envelope::decode(&buf[..len])? else {
                continue;
            };
            if let RaftMessage::QueryResponse(QueryResponse {
                leader_id,
                leader_addr,
                ..
            }) = envelope.message
            {
                answered += 1;
                if let (Some(id), Some(addr)) = (leader_id, leader_addr) {
                    debug!(leader_id = id, leader_addr = %addr, "found leader");
                    return Ok((id, addr));
                }
            }
        }
        Err(ServerError::NoLeader(self.nodes.clone()))
    }

    /// Replicate a command through the leader and wait for it to be applied.
    pub fn command(&self, command: &str) -> Result<CommandResponse> {
        self.send_command(ClientCommand::new(command, ""))
    }

    /// Ask the cluster to add node `id`, reachable at `address`.
    pub fn join(&self, id: NodeId, address: &str) -> Result<CommandResponse> {
        self.send_command(ClientCommand::join(id, address, ""))
    }

    /// Ask the cluster to remove node `id`.
    pub fn leave(&self, id: NodeId, address: &str) -> Result<CommandResponse> {
        self.send_command(ClientCommand::leave(id, address, ""))
    }

    pub fn query(&self, query: &str) -> Result<QueryResponse> {
        let message = RaftMessage::Query(ClientQuery::new(query, ""));
        self.exchange(message, |reply| match reply {
            RaftMessage::QueryResponse(QueryResponse {
                redirect_to: Some(next),
                ..
            }) => Ok(Reply::Redirect(next)),
            RaftMessage::QueryResponse(response) => Ok(Reply::Done(response)),
            other => Err(ServerError::UnexpectedReply(other.kind())),
        })
    }

    fn send_command(&self, command: ClientCommand) -> Result<CommandResponse> {
        self.exchange(RaftMessage::Command(command), |reply| match reply {
            RaftMessage::CommandResponse(CommandResponse {
                redirect_to: Some(next),
                ..
            }) => Ok(Reply::Redirect(next)),
            RaftMessage::CommandResponse(response) => Ok(Reply::Done(response)),
            other => Err(ServerError::UnexpectedReply(other.kind())),
        })
    }

    fn exchange<T>(
        &self,
        message: RaftMessage,
        read: impl Fn(RaftMessage) -> Result<Reply<T>>,
    ) -> Result<T> {
        let (_, mut target) = self.leader()?;
        for hop in 0..=self.max_redirects {
            match read(self.request(&target, &message)?)? {
                Reply::Done(response) => return Ok(response),
                Reply::Redirect(next) => {
                    debug!(hop, from = %target, to = %next, "following redirect");
                    target = next;
                }
            }
        }
        Err(ServerError::TooManyRedirects(self.max_redirects))
    }

    /// Send one request and wait for the single reply.
    fn request(&self, addr: &str, message: &RaftMessage) -> Result<RaftMessage> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.timeout))?;
        let raw = Envelope::anonymous(message.clone()).encode()?;
        debug!(kind = message.kind(), to = addr, "sending request");
        socket.send_to(&raw, addr)?;

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if is_timeout(&e) || is_unreachable(&e) => {
                    return Err(ServerError::Timeout(addr.to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(envelope) = Envelope::decode(&buf[..len])? {
                return Ok(envelope.message);
            }
        }
    }
}
