//! # role
//!
//! why: follower, candidate and leader react to the same events in different ways
//! relations: driven by node.rs through Context; each role lives in its own module
//! what: Role enum plus helpers shared by more than one role

mod candidate;
mod follower;
mod leader;

pub use candidate::Candidate;
pub use follower::Follower;
pub use leader::Leader;

use std::time::{Duration, Instant};

use tracing::debug;

use crate::message::{ClientCommand, ClientQuery, CommandResponse, QueryResponse, RaftMessage, VoteRequest, VoteResponse};
use crate::node::{Context, NodeState};
use crate::NodeId;

/// The active role of a node. Exactly one at any time.
#[derive(Debug)]
pub enum Role {
    Follower(Follower),
    Candidate(Candidate),
    Leader(Leader),
}

impl Role {
    pub fn state(&self) -> NodeState {
        match self {
            Self::Follower(_) => NodeState::Follower,
            Self::Candidate(_) => NodeState::Candidate,
            Self::Leader(_) => NodeState::Leader,
        }
    }

    /// Time until the election deadline. Leaders have none.
    pub fn time_until_timeout(&self, now: Instant) -> Duration {
        match self {
            Self::Follower(follower) => follower.election_timeout().saturating_duration_since(now),
            Self::Candidate(candidate) => {
                candidate.election_timeout().saturating_duration_since(now)
            }
            Self::Leader(_) => Duration::ZERO,
        }
    }
}

pub(crate) fn timed_out(ctx: &Context, deadline: Instant) -> bool {
    ctx.timer.now() > deadline
}

/// Refuse a vote. Candidates and leaders are contesting or holding the term.
pub(crate) fn deny_vote(ctx: &mut Context, peer: NodeId, req: &VoteRequest) {
    debug!(
        node_id = ctx.node_id,
        candidate = req.candidate_id,
        term = req.term,
        "rejecting vote request"
    );
    let reply = RaftMessage::VoteResponse(VoteResponse {
        term: ctx.current_term,
        vote_granted: false,
    });
    ctx.send_to_peer(peer, reply);
}

/// Point a client at the leader, or drop the request if no leader is known.
pub(crate) fn redirect_command(ctx: &mut Context, cmd: &ClientCommand) {
    let Some(leader_addr) = ctx.leader_addr() else {
        debug!(node_id = ctx.node_id, client = %cmd.client, "no known leader, dropping command");
        return;
    };
    let reply = RaftMessage::CommandResponse(CommandResponse {
        success: false,
        redirect_to: Some(leader_addr),
        ..CommandResponse::default()
    });
    ctx.send(&cmd.client, reply);
}

/// Answer the leader query from local knowledge and redirect anything else.
pub(crate) fn answer_query_without_leadership(ctx: &mut Context, query: &ClientQuery) {
    let leader_addr = ctx.leader_addr();
    let reply = if query.is_leader_query() {
        QueryResponse {
            success: true,
            leader_id: ctx.leader_id,
            leader_addr,
            ..QueryResponse::default()
        }
    } else {
        let Some(leader_addr) = leader_addr else {
            debug!(node_id = ctx.node_id, client = %query.client, "no known leader, dropping query");
            return;
        };
        QueryResponse {
            success: false,
            redirect_to: Some(leader_addr),
            ..QueryResponse::default()
        }
    };
    ctx.send(&query.client, RaftMessage::QueryResponse(reply));
}
