//! # node
//!
//! why: one place owns term, vote, membership and the log, and arbitrates between roles
//! relations: owns log.rs and the collaborators, hands them to role/* one event at a time
//! what: NodeState, Collaborators, Context, Node dispatcher

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RaftConfig;
use crate::election::Election;
use crate::error::Result;
use crate::handler::Handler;
use crate::log::LogContainer;
use crate::message::{Envelope, RaftMessage};
use crate::persistence::{Metadata, Persistence, Snapshot, SnapshotMeta};
use crate::role::{self, Follower, Leader, Role};
use crate::timer::Timer;
use crate::transport::Transmitter;
use crate::{Cluster, NodeId, Term};

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - replicates from a leader, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// The external pieces a node talks to.
pub struct Collaborators {
    pub transmitter: Box<dyn Transmitter>,
    pub timer: Box<dyn Timer>,
    pub persistence: Box<dyn Persistence>,
    pub handler: Box<dyn Handler>,
}

/// Node state shared by every role.
///
/// Roles receive `&mut Context` for the duration of a single event and never
/// keep it.
pub(crate) struct Context {
    pub(crate) node_id: NodeId,
    pub(crate) config: RaftConfig,
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<NodeId>,
    pub(crate) cluster: Cluster,
    /// Membership at the snapshot boundary, in effect while the log holds no config entry.
    pub(crate) snapshot_cluster: Cluster,
    pub(crate) leader_id: Option<NodeId>,
    pub(crate) log: LogContainer,
    pub(crate) transmitter: Box<dyn Transmitter>,
    pub(crate) timer: Box<dyn Timer>,
    pub(crate) persistence: Box<dyn Persistence>,
    pub(crate) handler: Box<dyn Handler>,
}

impl Context {
    /// Every member except this node.
    pub(crate) fn peers(&self) -> Vec<NodeId> {
        self.cluster
            .keys()
            .copied()
            .filter(|&id| id != self.node_id)
            .collect()
    }

    pub(crate) fn leader_addr(&self) -> Option<String> {
        self.leader_id.and_then(|id| self.cluster.get(&id).cloned())
    }

    /// Take membership from the log again after it changed underneath us.
    ///
    /// A node always runs on the last config entry in its log, so a
    /// truncated uncommitted change falls back to the one before it.
    pub(crate) fn refresh_cluster(&mut self) {
        let cluster = self
            .log
            .last_config()
            .unwrap_or(&self.snapshot_cluster)
            .clone();
        if cluster != self.cluster {
            info!(node_id = self.node_id, members = cluster.len(), "membership changed");
            self.cluster = cluster;
        }
    }

    /// Send to an address.
    pub(crate) fn send(&mut self, to: &str, message: RaftMessage) {
        debug!(node_id = self.node_id, kind = message.kind(), to, "sending");
        self.transmitter.send(to, Envelope::new(self.node_id, message));
    }

    /// Send to a cluster member by id. Members without a known address are skipped.
    pub(crate) fn send_to_peer(&mut self, peer: NodeId, message: RaftMessage) {
        match self.cluster.get(&peer).cloned() {
            Some(address) => self.send(&address, message),
            None => warn!(
                node_id = self.node_id,
                peer,
                kind = message.kind(),
                "no address for peer, dropping"
            ),
        }
    }

    /// Persist metadata and log, compacting first when the log grew past its limit.
    pub(crate) fn save(&mut self) -> Result<()> {
        if self.log.exceeds_limit(self.config.max_log_entries) {
            self.compact()?;
        }
        self.persistence
            .save_log_entries(self.log.first_index(), self.log.entries())?;
        self.persistence.save_metadata(&Metadata {
            current_term: self.current_term,
            voted_for: self.voted_for,
            cluster: self.cluster.clone(),
            snapshot_cluster: Some(self.snapshot_cluster.clone()),
        })
    }

    /// Fold applied entries into a snapshot of application state.
    pub(crate) fn compact(&mut self) -> Result<()> {
        let meta = SnapshotMeta {
            last_included_index: self.log.last_applied(),
            last_included_term: self.log.last_applied_term()?,
        };
        if let Some(cluster) = self.log.config_through(meta.last_included_index) {
            self.snapshot_cluster = cluster.clone();
        }
        let data = self.handler.take_snapshot(meta)?;
        self.persistence.save_snapshot(&Snapshot::new(meta, data))?;
        self.log.drop_until_last_applied()?;
        info!(
            node_id = self.node_id,
            last_included_index = meta.last_included_index,
            last_included_term = meta.last_included_term,
            "compacted log into snapshot"
        );
        Ok(())
    }
}

/// A single consensus participant.
///
/// Every inbound event goes through `dispatch`. The node first applies the
/// term rule (a higher term turns any role into a fresh follower), then hands
/// the event to the active role.
pub struct Node {
    ctx: Context,
    role: Role,
}

impl Node {
    /// Restore a node from its collaborators and start it as a follower.
    pub fn new(node_id: NodeId, config: RaftConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            transmitter,
            timer,
            persistence,
            mut handler,
        } = collaborators;

        let snapshot = persistence.read_snapshot()?;
        if snapshot.last_included_index > handler.last_included().last_included_index {
            handler.restore(&snapshot)?;
        }

        let metadata = persistence.read_metadata()?;
        let log = LogContainer::from_stored(handler.last_included(), persistence.read_log_entries()?)?;
        let snapshot_cluster = metadata.snapshot_cluster.unwrap_or(metadata.cluster);
        let cluster = log.last_config().unwrap_or(&snapshot_cluster).clone();

        let mut ctx = Context {
            node_id,
            config,
            current_term: metadata.current_term,
            voted_for: metadata.voted_for,
            cluster,
            snapshot_cluster,
            leader_id: None,
            log,
            transmitter,
            timer,
            persistence,
            handler,
        };
        let role = Role::Follower(Follower::new(&mut ctx));

        info!(
            node_id,
            term = ctx.current_term,
            last_index = ctx.log.last_index(),
            members = ctx.cluster.len(),
            "node started"
        );
        Ok(Self { ctx, role })
    }

    /// Process one inbound event.
    pub fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        let Envelope { peer, message } = envelope;
        debug!(
            node_id = self.ctx.node_id,
            kind = message.kind(),
            ?peer,
            term = ?message.term(),
            "dispatching"
        );

        if let Some(term) = message.term() {
            if peer.is_none() {
                warn!(kind = message.kind(), "peer message without sender, dropping");
                return Ok(());
            }
            self.observe_term(term)?;
        }
        let peer = peer.unwrap_or(self.ctx.node_id);

        let ctx = &mut self.ctx;
        let next = match (&mut self.role, message) {
            (Role::Follower(follower), RaftMessage::Tick) => follower.on_tick(ctx)?,
            (Role::Candidate(candidate), RaftMessage::Tick) => candidate.on_tick(ctx)?,
            (Role::Leader(leader), RaftMessage::Tick) => {
                leader.on_tick(ctx)?;
                None
            }

            (Role::Follower(follower), RaftMessage::VoteRequest(req)) => {
                follower.on_request_vote(ctx, peer, req)?;
                None
            }
            (_, RaftMessage::VoteRequest(req)) => {
                role::deny_vote(ctx, peer, &req);
                None
            }

            (Role::Candidate(candidate), RaftMessage::VoteResponse(resp)) => {
                candidate.on_request_vote_resp(ctx, peer, resp)?
            }

            (Role::Follower(follower), RaftMessage::AppendEntries(req)) => {
                follower.on_append_entries(ctx, peer, req)?;
                None
            }
            (Role::Candidate(candidate), RaftMessage::AppendEntries(req)) => {
                candidate.on_append_entries(ctx, peer, req)?
            }
            (Role::Leader(leader), RaftMessage::AppendEntries(req)) => {
                leader.on_append_entries(ctx, peer, req);
                None
            }

            (Role::Follower(follower), RaftMessage::InstallSnapshot(req)) => {
                follower.on_install_snapshot(ctx, peer, req)?;
                None
            }
            (Role::Candidate(candidate), RaftMessage::InstallSnapshot(req)) => {
                candidate.on_install_snapshot(ctx, peer, req)?
            }

            (Role::Leader(leader), RaftMessage::AppendEntriesResponse(resp)) => {
                leader.on_append_entries_resp(ctx, peer, resp)?;
                None
            }
            (Role::Leader(leader), RaftMessage::InstallSnapshotResponse(resp)) => {
                leader.on_install_snapshot_resp(ctx, peer, resp)?;
                None
            }

            (Role::Leader(leader), RaftMessage::Command(cmd)) => {
                leader.on_client_command(ctx, cmd)?;
                None
            }
            (_, RaftMessage::Command(cmd)) => {
                role::redirect_command(ctx, &cmd);
                None
            }

            (Role::Leader(leader), RaftMessage::Query(query)) => {
                leader.on_client_query(ctx, query)?;
                None
            }
            (_, RaftMessage::Query(query)) => {
                role::answer_query_without_leadership(ctx, &query);
                None
            }

            (_, message @ (RaftMessage::CommandResponse(_) | RaftMessage::QueryResponse(_))) => {
                warn!(kind = message.kind(), "don't know how to dispatch, dropping");
                None
            }

            (_, message) => {
                debug!(
                    node_id = ctx.node_id,
                    kind = message.kind(),
                    "not handled in current role"
                );
                None
            }
        };

        if let Some(role) = next {
            self.become_role(role);
        }
        Ok(())
    }

    /// Adopt a higher term seen in any rpc and fall back to follower.
    fn observe_term(&mut self, term: Term) -> Result<()> {
        if term <= self.ctx.current_term {
            return Ok(());
        }
        info!(
            node_id = self.ctx.node_id,
            from = self.ctx.current_term,
            to = term,
            "observed higher term, stepping down"
        );
        self.ctx.current_term = term;
        self.ctx.voted_for = None;
        self.ctx.leader_id = None;
        self.role = Role::Follower(Follower::new(&mut self.ctx));
        self.ctx.save()
    }

    fn become_role(&mut self, role: Role) {
        if role.state() != self.role.state() {
            info!(
                node_id = self.ctx.node_id,
                term = self.ctx.current_term,
                from = ?self.role.state(),
                to = ?role.state(),
                "role change"
            );
        }
        self.role = role;
    }

    pub fn id(&self) -> NodeId {
        self.ctx.node_id
    }

    pub fn state(&self) -> NodeState {
        self.role.state()
    }

    pub fn current_term(&self) -> Term {
        self.ctx.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.ctx.voted_for
    }

    pub fn cluster(&self) -> &Cluster {
        &self.ctx.cluster
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.ctx.leader_id
    }

    pub fn leader_addr(&self) -> Option<String> {
        self.ctx.leader_addr()
    }

    pub fn log(&self) -> &LogContainer {
        &self.ctx.log
    }

    pub fn config(&self) -> &RaftConfig {
        &self.ctx.config
    }

    /// Replication bookkeeping, while leader.
    pub fn leader(&self) -> Option<&Leader> {
        match &self.role {
            Role::Leader(leader) => Some(leader),
            _ => None,
        }
    }

    /// The running vote tally, while candidate.
    pub fn election(&self) -> Option<&Election> {
        match &self.role {
            Role::Candidate(candidate) => Some(candidate.election()),
            _ => None,
        }
    }

    /// Time left before an election starts. Always zero for a leader.
    pub fn time_until_timeout(&self) -> Duration {
        self.role.time_until_timeout(self.ctx.timer.now())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.ctx.node_id)
            .field("state", &self.role.state())
            .field("term", &self.ctx.current_term)
            .field("voted_for", &self.ctx.voted_for)
            .field("leader_id", &self.ctx.leader_id)
            .field("last_index", &self.ctx.log.last_index())
            .field("last_commit", &self.ctx.log.last_commit())
            .finish()
    }
}
