//! # candidate
//!
//! why: a follower that lost touch with its leader campaigns for the next term
//! relations: started by follower.rs on timeout, becomes leader.rs on a won election
//! what: Candidate with vote collection and step-down on a legitimate leader

use std::time::Instant;

use tracing::{debug, info};

use super::{timed_out, Follower, Leader, Role};
use crate::election::{Election, Vote};
use crate::error::Result;
use crate::message::{
    AppendEntries, AppendEntriesResponse, InstallSnapshot, InstallSnapshotResponse, RaftMessage,
    VoteRequest, VoteResponse,
};
use crate::node::Context;
use crate::NodeId;

#[derive(Debug)]
pub struct Candidate {
    election: Election,
    election_timeout: Instant,
}

impl Candidate {
    /// Enter a new term and ask every peer for its vote.
    ///
    /// A single-member cluster wins on its own vote and comes back as leader.
    pub(crate) fn start(ctx: &mut Context) -> Result<Role> {
        ctx.current_term += 1;
        ctx.voted_for = Some(ctx.node_id);
        ctx.leader_id = None;
        ctx.save()?;

        let mut candidate = Self {
            election: Election::new(ctx.cluster.len()),
            election_timeout: ctx.timer.next_timeout(),
        };
        info!(
            node_id = ctx.node_id,
            term = ctx.current_term,
            members = ctx.cluster.len(),
            "starting election"
        );

        let request = VoteRequest {
            term: ctx.current_term,
            candidate_id: ctx.node_id,
            last_log_index: ctx.log.last_index(),
            last_log_term: ctx.log.last_term(),
        };
        for peer in ctx.peers() {
            ctx.send_to_peer(peer, RaftMessage::VoteRequest(request.clone()));
        }

        candidate.election.receive_vote(
            ctx.node_id,
            Vote {
                term: ctx.current_term,
                vote_granted: true,
            },
        );
        candidate.conclude(ctx).map(|won| won.unwrap_or(Role::Candidate(candidate)))
    }

    pub fn election(&self) -> &Election {
        &self.election
    }

    pub fn election_timeout(&self) -> Instant {
        self.election_timeout
    }

    pub(crate) fn on_request_vote_resp(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        resp: VoteResponse,
    ) -> Result<Option<Role>> {
        if resp.term != ctx.current_term {
            debug!(node_id = ctx.node_id, peer, term = resp.term, "ignoring stale vote");
            return Ok(None);
        }
        self.election.receive_vote(
            peer,
            Vote {
                term: resp.term,
                vote_granted: resp.vote_granted,
            },
        );
        debug!(
            node_id = ctx.node_id,
            peer,
            granted = resp.vote_granted,
            tally = self.election.granted_votes(),
            majority = self.election.majority(),
            "vote received"
        );
        self.conclude(ctx)
    }

    /// A leader for this term exists, so give up and follow it.
    pub(crate) fn on_append_entries(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        req: AppendEntries,
    ) -> Result<Option<Role>> {
        if req.term < ctx.current_term {
            let reply = RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                term: ctx.current_term,
                success: false,
                match_index: None,
            });
            ctx.send_to_peer(peer, reply);
            return Ok(None);
        }
        info!(node_id = ctx.node_id, leader = req.leader_id, term = req.term, "found leader, stepping down");
        let mut follower = Follower::new(ctx);
        follower.on_append_entries(ctx, peer, req)?;
        Ok(Some(Role::Follower(follower)))
    }

    pub(crate) fn on_install_snapshot(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        req: InstallSnapshot,
    ) -> Result<Option<Role>> {
        if req.term < ctx.current_term {
            let reply = RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                term: ctx.current_term,
                success: false,
                match_index: ctx.log.last_index(),
            });
            ctx.send_to_peer(peer, reply);
            return Ok(None);
        }
        info!(node_id = ctx.node_id, leader = req.leader_id, term = req.term, "found leader, stepping down");
        let mut follower = Follower::new(ctx);
        follower.on_install_snapshot(ctx, peer, req)?;
        Ok(Some(Role::Follower(follower)))
    }

    /// A split vote runs out the clock; campaign again in a fresh term.
    pub(crate) fn on_tick(&mut self, ctx: &mut Context) -> Result<Option<Role>> {
        if !timed_out(ctx, self.election_timeout) {
            return Ok(None);
        }
        info!(node_id = ctx.node_id, term = ctx.current_term, "election timed out, retrying");
        Self::start(ctx).map(Some)
    }

    fn conclude(&self, ctx: &mut Context) -> Result<Option<Role>> {
        if !self.election.is_won() {
            return Ok(None);
        }
        info!(
            node_id = ctx.node_id,
            term = ctx.current_term,
            votes = self.election.granted_votes(),
            "won election"
        );
        Leader::start(ctx).map(|leader| Some(Role::Leader(leader)))
    }
}
