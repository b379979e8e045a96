//! # message
//!
//! why: define every message a node exchanges with peers and clients
//! relations: produced and consumed by node.rs and role/*, encoded on the wire by quorum-server
//! what: RaftMessage, per-kind payload structs, Envelope and its json codec

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::{Cluster, Index, NodeId, Term};

/// Message kinds understood by `RaftMessage`, as they appear on the wire.
pub const MESSAGE_KINDS: &[&str] = &[
    "tick",
    "request_vote",
    "request_vote_resp",
    "append_entries",
    "append_entries_resp",
    "install_snapshot",
    "install_snapshot_resp",
    "command",
    "command_resp",
    "query",
    "query_resp",
];

/// A message plus the id of the node that sent it.
///
/// Clients have no node id, so `peer` is absent on client requests and on
/// the locally generated tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub peer: Option<NodeId>,
    pub message: RaftMessage,
}

impl Envelope {
    pub fn new(peer: NodeId, message: RaftMessage) -> Self {
        Self {
            peer: Some(peer),
            message,
        }
    }

    /// A message that does not come from a cluster member.
    pub fn anonymous(message: RaftMessage) -> Self {
        Self {
            peer: None,
            message,
        }
    }

    pub fn tick() -> Self {
        Self::anonymous(RaftMessage::Tick)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a datagram.
    ///
    /// Bytes that are not a message at all are an error. A well-formed
    /// message of a kind this node does not know yields `Ok(None)`.
    pub fn decode(raw: &[u8]) -> Result<Option<Self>> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| Error::Malformed(e.to_string()))?;
        let kind = value
            .get("message")
            .and_then(|message| message.get("message_type"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Malformed("missing message_type".to_string()))?;

        if !MESSAGE_KINDS.contains(&kind) {
            tracing::warn!(kind, "dropping message of unknown kind");
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::Malformed(e.to_string()))
    }
}

/// All messages a node can receive or send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum RaftMessage {
    /// Local clock tick, never sent over the wire by peers.
    Tick,
    #[serde(rename = "request_vote")]
    VoteRequest(VoteRequest),
    #[serde(rename = "request_vote_resp")]
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    #[serde(rename = "append_entries_resp")]
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshot),
    #[serde(rename = "install_snapshot_resp")]
    InstallSnapshotResponse(InstallSnapshotResponse),
    Command(ClientCommand),
    #[serde(rename = "command_resp")]
    CommandResponse(CommandResponse),
    Query(ClientQuery),
    #[serde(rename = "query_resp")]
    QueryResponse(QueryResponse),
}

impl RaftMessage {
    /// Wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::VoteRequest(_) => "request_vote",
            Self::VoteResponse(_) => "request_vote_resp",
            Self::AppendEntries(_) => "append_entries",
            Self::AppendEntriesResponse(_) => "append_entries_resp",
            Self::InstallSnapshot(_) => "install_snapshot",
            Self::InstallSnapshotResponse(_) => "install_snapshot_resp",
            Self::Command(_) => "command",
            Self::CommandResponse(_) => "command_resp",
            Self::Query(_) => "query",
            Self::QueryResponse(_) => "query_resp",
        }
    }

    /// The sender's term, for peer RPCs.
    pub fn term(&self) -> Option<Term> {
        match self {
            Self::VoteRequest(m) => Some(m.term),
            Self::VoteResponse(m) => Some(m.term),
            Self::AppendEntries(m) => Some(m.term),
            Self::AppendEntriesResponse(m) => Some(m.term),
            Self::InstallSnapshot(m) => Some(m.term),
            Self::InstallSnapshotResponse(m) => Some(m.term),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Replicates entries; with no entries it doubles as a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub commit_index: Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_index: Option<Index>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshot {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: Index,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: Index,
}

/// A node asking to enter or leave the cluster through a `join`/`leave` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    pub command: String,
    /// Reply address, filled in by the receiving transport.
    #[serde(default)]
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
}

impl ClientCommand {
    pub fn new(command: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            client: client.into(),
            member: None,
        }
    }

    pub fn join(id: NodeId, address: impl Into<String>, client: impl Into<String>) -> Self {
        Self::membership("join", id, address, client)
    }

    pub fn leave(id: NodeId, address: impl Into<String>, client: impl Into<String>) -> Self {
        Self::membership("leave", id, address, client)
    }

    fn membership(
        command: &str,
        id: NodeId,
        address: impl Into<String>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            command: command.to_string(),
            client: client.into(),
            member: Some(Member {
                id,
                address: address.into(),
            }),
        }
    }

    pub fn is_config_change(&self) -> bool {
        self.command == "join" || self.command == "leave"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Cluster>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_index: Option<Index>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_index: Option<Index>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_index: Option<Index>,
}

/// The synthetic query every node answers from local knowledge.
pub const LEADER_QUERY: &str = "leader";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientQuery {
    pub query: String,
    #[serde(default)]
    pub client: String,
}

impl ClientQuery {
    pub fn new(query: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            client: client.into(),
        }
    }

    pub fn is_leader_query(&self) -> bool {
        self.query == LEADER_QUERY
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_index: Option<Index>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_kind() {
        let message = RaftMessage::VoteRequest(VoteRequest {
            term: 2,
            candidate_id: 1,
            last_log_index: 4,
            last_log_term: 1,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["message_type"], "request_vote");
        assert_eq!(message.kind(), "request_vote");
        assert_eq!(message.term(), Some(2));
    }

    #[test]
    fn append_entries_survives_the_wire() {
        let envelope = Envelope::new(
            3,
            RaftMessage::AppendEntries(AppendEntries {
                term: 1,
                leader_id: 3,
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![LogEntry::noop(1), LogEntry::command(1, "set a=1", "c:1")],
                commit_index: 0,
            }),
        );
        let raw = envelope.encode().unwrap();
        assert_eq!(Envelope::decode(&raw).unwrap(), Some(envelope));
    }

    #[test]
    fn client_request_without_client_field_decodes() {
        let raw = br#"{"message":{"message_type":"query","query":"leader"}}"#;
        let envelope = Envelope::decode(raw).unwrap().unwrap();
        assert_eq!(envelope.peer, None);
        match envelope.message {
            RaftMessage::Query(query) => {
                assert!(query.is_leader_query());
                assert!(query.client.is_empty());
            }
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_dropped_not_fatal() {
        let raw = br#"{"peer":2,"message":{"message_type":"pre_vote","term":3}}"#;
        assert_eq!(Envelope::decode(raw).unwrap(), None);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(Envelope::decode(b"not json"), Err(Error::Malformed(_))));
        assert!(matches!(
            Envelope::decode(br#"{"message":{"message_type":"request_vote"}}"#),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn membership_commands_are_config_changes() {
        assert!(ClientCommand::join(4, "127.0.0.1:2361", "c").is_config_change());
        assert!(ClientCommand::leave(4, "127.0.0.1:2361", "c").is_config_change());
        assert!(!ClientCommand::new("set a=1", "c").is_config_change());
    }
}
