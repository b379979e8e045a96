//! # follower
//!
//! why: the passive role; replicates the leader's log and grants votes
//! relations: entered from node.rs on start or step-down, from candidate.rs on losing
//! what: Follower with vote granting, append consistency check, snapshot install

use std::time::Instant;

use tracing::{debug, info};

use super::{timed_out, Candidate, Role};
use crate::entry::LogEntry;
use crate::error::Result;
use crate::log::LogContainer;
use crate::message::{
    AppendEntries, AppendEntriesResponse, InstallSnapshot, InstallSnapshotResponse, RaftMessage,
    VoteRequest, VoteResponse,
};
use crate::node::Context;
use crate::persistence::Snapshot;
use crate::NodeId;

#[derive(Debug)]
pub struct Follower {
    election_timeout: Instant,
}

impl Follower {
    pub(crate) fn new(ctx: &mut Context) -> Self {
        Self {
            election_timeout: ctx.timer.next_timeout(),
        }
    }

    pub fn election_timeout(&self) -> Instant {
        self.election_timeout
    }

    pub(crate) fn on_request_vote(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        req: VoteRequest,
    ) -> Result<()> {
        let vote_granted = grants_vote(ctx, &req);
        if vote_granted {
            debug!(node_id = ctx.node_id, candidate = req.candidate_id, term = req.term, "granting vote");
            ctx.voted_for = Some(req.candidate_id);
            ctx.save()?;
            self.election_timeout = ctx.timer.next_timeout();
        } else {
            debug!(
                node_id = ctx.node_id,
                candidate = req.candidate_id,
                term = req.term,
                last_log_term = ctx.log.last_term(),
                last_log_index = ctx.log.last_index(),
                "rejecting vote request"
            );
        }

        let reply = RaftMessage::VoteResponse(VoteResponse {
            term: ctx.current_term,
            vote_granted,
        });
        ctx.send_to_peer(peer, reply);
        Ok(())
    }

    pub(crate) fn on_append_entries(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        req: AppendEntries,
    ) -> Result<()> {
        self.election_timeout = ctx.timer.next_timeout();

        if ctx.current_term > req.term || !ctx.log.include(req.prev_log_index, req.prev_log_term) {
            debug!(
                node_id = ctx.node_id,
                term = req.term,
                prev_log_index = req.prev_log_index,
                prev_log_term = req.prev_log_term,
                "rejecting append entries"
            );
            let reply = RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                term: ctx.current_term,
                success: false,
                match_index: None,
            });
            ctx.send_to_peer(peer, reply);
            return Ok(());
        }

        ctx.leader_id = Some(req.leader_id);

        let has_entries = !req.entries.is_empty();
        let previous_commit = ctx.log.last_commit();
        let match_index = ctx.log.replace_from(req.prev_log_index, req.entries)?;
        ctx.refresh_cluster();
        ctx.log.advance_commit_to(req.commit_index.min(match_index));
        apply_committed(ctx);

        if has_entries || ctx.log.last_commit() != previous_commit {
            ctx.save()?;
        }

        let reply = RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            term: ctx.current_term,
            success: true,
            match_index: Some(match_index),
        });
        ctx.send_to_peer(peer, reply);
        Ok(())
    }

    pub(crate) fn on_install_snapshot(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        req: InstallSnapshot,
    ) -> Result<()> {
        self.election_timeout = ctx.timer.next_timeout();

        if ctx.current_term > req.term {
            let reply = RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                term: ctx.current_term,
                success: false,
                match_index: ctx.log.last_index(),
            });
            ctx.send_to_peer(peer, reply);
            return Ok(());
        }

        ctx.leader_id = Some(req.leader_id);

        if !ctx.log.include(req.last_included_index, req.last_included_term) {
            info!(
                node_id = ctx.node_id,
                last_included_index = req.last_included_index,
                last_included_term = req.last_included_term,
                "installing snapshot from leader"
            );
            let snapshot = Snapshot {
                last_included_index: req.last_included_index,
                last_included_term: req.last_included_term,
                data: req.data,
            };
            ctx.handler.restore(&snapshot)?;
            ctx.log = LogContainer::with_snapshot(req.last_included_index, req.last_included_term);
            // the snapshot carries no membership, so keep the one we run on
            ctx.snapshot_cluster = ctx.cluster.clone();
            ctx.persistence.save_snapshot(&snapshot)?;
            ctx.save()?;
        }

        let reply = RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
            term: ctx.current_term,
            success: true,
            match_index: req.last_included_index.max(ctx.log.snapshot_meta().last_included_index),
        });
        ctx.send_to_peer(peer, reply);
        Ok(())
    }

    /// Start campaigning once the leader has been silent past the deadline.
    pub(crate) fn on_tick(&mut self, ctx: &mut Context) -> Result<Option<Role>> {
        if !timed_out(ctx, self.election_timeout) {
            return Ok(None);
        }
        info!(node_id = ctx.node_id, term = ctx.current_term, "election timeout elapsed");
        Candidate::start(ctx).map(Some)
    }
}

/// Grant iff the term is current, no other candidate holds our vote, and the
/// candidate's log is at least as up to date as ours.
fn grants_vote(ctx: &Context, req: &VoteRequest) -> bool {
    if req.term < ctx.current_term {
        return false;
    }
    if ctx.voted_for.is_some_and(|voted| voted != req.candidate_id) {
        return false;
    }
    (req.last_log_term, req.last_log_index) >= (ctx.log.last_term(), ctx.log.last_index())
}

/// Feed newly committed commands to the application. Followers do not answer
/// clients, so outcomes are discarded; queries have no effect to replay.
fn apply_committed(ctx: &mut Context) {
    for index in ctx.log.unapplied() {
        if let Some(LogEntry::Command {
            command: Some(command),
            ..
        }) = ctx.log.get(index)
        {
            ctx.handler.on_command(command);
        }
        ctx.log.mark_applied(index);
    }
}
