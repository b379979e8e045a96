//! # leader
//!
//! why: one node per term orders every write and decides what is committed
//! relations: entered from candidate.rs after a won election; commit math lives in replica.rs
//! what: Leader with replication bookkeeping, commit, apply, client commands and queries

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::entry::LogEntry;
use crate::error::Result;
use crate::message::{
    AppendEntries, AppendEntriesResponse, ClientCommand, ClientQuery, CommandResponse,
    InstallSnapshot, InstallSnapshotResponse, QueryResponse, RaftMessage,
};
use crate::node::Context;
use crate::replica::ReplicaCounter;
use crate::{Index, NodeId};

/// Per-peer replication progress.
///
/// `next_index` is the next position to ship to a peer; `match_index` is the
/// highest position the peer is known to hold. Only peers are tracked, the
/// leader's own progress is its last index.
#[derive(Debug)]
pub struct Leader {
    next_index: BTreeMap<NodeId, Index>,
    match_index: BTreeMap<NodeId, Index>,
}

impl Leader {
    pub(crate) fn start(ctx: &mut Context) -> Result<Self> {
        ctx.leader_id = Some(ctx.node_id);

        let next = ctx.log.last_index() + 1;
        let peers = ctx.peers();
        let mut leader = Self {
            next_index: peers.iter().map(|&peer| (peer, next)).collect(),
            match_index: peers.iter().map(|&peer| (peer, 0)).collect(),
        };

        ctx.log.append([LogEntry::noop(ctx.current_term)]);
        ctx.save()?;
        info!(
            node_id = ctx.node_id,
            term = ctx.current_term,
            last_index = ctx.log.last_index(),
            "became leader"
        );

        if leader.next_index.is_empty() {
            leader.commit_entries(ctx)?;
        } else {
            leader.broadcast(ctx, true)?;
        }
        Ok(leader)
    }

    pub fn next_index(&self, peer: NodeId) -> Option<Index> {
        self.next_index.get(&peer).copied()
    }

    pub fn match_index(&self, peer: NodeId) -> Option<Index> {
        self.match_index.get(&peer).copied()
    }

    /// Another node claims leadership of our own term. Refuse it.
    pub(crate) fn on_append_entries(&mut self, ctx: &mut Context, peer: NodeId, req: AppendEntries) {
        warn!(
            node_id = ctx.node_id,
            peer,
            term = req.term,
            "append entries from another leader in the same term"
        );
        let reply = RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            term: ctx.current_term,
            success: false,
            match_index: None,
        });
        ctx.send_to_peer(peer, reply);
    }

    pub(crate) fn on_append_entries_resp(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        resp: AppendEntriesResponse,
    ) -> Result<()> {
        if resp.term != ctx.current_term {
            debug!(node_id = ctx.node_id, peer, term = resp.term, "ignoring stale append response");
            return Ok(());
        }
        let Some(&next) = self.next_index.get(&peer) else {
            debug!(node_id = ctx.node_id, peer, "append response from a non-member");
            return Ok(());
        };

        if resp.success {
            let matched = self.update_peer_index(ctx, peer, resp.match_index.unwrap_or(next - 1));
            self.commit_entries(ctx)?;
            if matched < ctx.log.last_index() {
                self.replicate(ctx, peer, false)?;
            }
            return Ok(());
        }

        let next = next.saturating_sub(1).max(1);
        self.next_index.insert(peer, next);
        debug!(node_id = ctx.node_id, peer, next_index = next, "peer log diverges, backing off");
        self.replicate(ctx, peer, true)
    }

    pub(crate) fn on_install_snapshot_resp(
        &mut self,
        ctx: &mut Context,
        peer: NodeId,
        resp: InstallSnapshotResponse,
    ) -> Result<()> {
        let as_append = AppendEntriesResponse {
            term: resp.term,
            success: resp.success,
            match_index: Some(resp.match_index),
        };
        self.on_append_entries_resp(ctx, peer, as_append)
    }

    /// Advance the commit cursor to whatever a majority agrees on and apply it.
    pub(crate) fn commit_entries(&mut self, ctx: &mut Context) -> Result<()> {
        let agreed = ReplicaCounter::new(&ctx.log, &self.match_index, ctx.current_term)
            .majority_agreed_commit();
        if agreed <= ctx.log.last_commit() {
            return Ok(());
        }
        ctx.log.advance_commit_to(agreed);
        debug!(node_id = ctx.node_id, commit_index = ctx.log.last_commit(), "commit advanced");
        self.apply_entries(ctx)
    }

    /// Deliver committed entries to the application and answer their clients.
    fn apply_entries(&mut self, ctx: &mut Context) -> Result<()> {
        for index in ctx.log.unapplied() {
            let reply = match ctx.log.get(index) {
                Some(LogEntry::Command {
                    command: Some(command),
                    client,
                    ..
                }) => {
                    let outcome = ctx.handler.on_command(command);
                    client.clone().map(|client| {
                        let reply = RaftMessage::CommandResponse(CommandResponse {
                            success: outcome.success,
                            data: outcome.data,
                            commit_index: Some(ctx.log.last_commit()),
                            applied_index: Some(index),
                            ..CommandResponse::default()
                        });
                        (client, reply)
                    })
                }
                Some(LogEntry::Query { query, client, .. }) => {
                    let outcome = ctx.handler.on_query(query);
                    let reply = RaftMessage::QueryResponse(QueryResponse {
                        success: outcome.success,
                        data: outcome.data,
                        applied_index: Some(index),
                        ..QueryResponse::default()
                    });
                    Some((client.clone(), reply))
                }
                _ => None,
            };
            ctx.log.mark_applied(index);
            if let Some((client, reply)) = reply {
                ctx.send(&client, reply);
            }
        }
        ctx.save()
    }

    pub(crate) fn on_client_command(&mut self, ctx: &mut Context, cmd: ClientCommand) -> Result<()> {
        if cmd.is_config_change() {
            return self.change_membership(ctx, cmd);
        }

        let index = ctx
            .log
            .append([LogEntry::command(ctx.current_term, cmd.command, cmd.client)]);
        debug!(node_id = ctx.node_id, index, "command appended");
        ctx.save()?;
        self.after_append(ctx)
    }

    fn change_membership(&mut self, ctx: &mut Context, cmd: ClientCommand) -> Result<()> {
        let member = match cmd.member.as_ref() {
            Some(member) if !ctx.log.reconfiguration_pending() => member,
            _ => {
                info!(
                    node_id = ctx.node_id,
                    command = %cmd.command,
                    "rejecting membership change"
                );
                reply_membership(ctx, &cmd.client, false);
                return Ok(());
            }
        };

        let mut cluster = ctx.cluster.clone();
        if cmd.command == "join" {
            cluster.insert(member.id, member.address.clone());
        } else if member.id == ctx.node_id || cluster.remove(&member.id).is_none() {
            info!(node_id = ctx.node_id, member = member.id, "refusing to remove member");
            reply_membership(ctx, &cmd.client, false);
            return Ok(());
        }

        if member.id != ctx.node_id {
            if cluster.contains_key(&member.id) {
                self.next_index.entry(member.id).or_insert(ctx.log.first_index());
                self.match_index.entry(member.id).or_insert(0);
            } else {
                self.next_index.remove(&member.id);
                self.match_index.remove(&member.id);
            }
        }

        info!(
            node_id = ctx.node_id,
            command = %cmd.command,
            member = member.id,
            members = cluster.len(),
            "membership change"
        );
        ctx.cluster = cluster.clone();
        ctx.log.append([LogEntry::config(ctx.current_term, cluster)]);
        ctx.save()?;
        reply_membership(ctx, &cmd.client, true);
        self.after_append(ctx)
    }

    pub(crate) fn on_client_query(&mut self, ctx: &mut Context, query: ClientQuery) -> Result<()> {
        if query.is_leader_query() {
            let reply = QueryResponse {
                success: true,
                leader_id: Some(ctx.node_id),
                leader_addr: ctx.cluster.get(&ctx.node_id).cloned(),
                ..QueryResponse::default()
            };
            ctx.send(&query.client, RaftMessage::QueryResponse(reply));
            return Ok(());
        }

        if ctx.config.linearizable_reads {
            ctx.log
                .append([LogEntry::query(ctx.current_term, query.query, query.client)]);
            ctx.save()?;
            return self.after_append(ctx);
        }

        // served from local state; may lag a newer leader we have not heard of
        let outcome = ctx.handler.on_query(&query.query);
        let reply = QueryResponse {
            success: outcome.success,
            data: outcome.data,
            applied_index: Some(ctx.log.last_applied()),
            ..QueryResponse::default()
        };
        ctx.send(&query.client, RaftMessage::QueryResponse(reply));
        Ok(())
    }

    pub(crate) fn on_tick(&mut self, ctx: &mut Context) -> Result<()> {
        self.broadcast(ctx, true)
    }

    /// Ship a new entry to every peer, or commit at once when there are none.
    fn after_append(&mut self, ctx: &mut Context) -> Result<()> {
        if self.next_index.is_empty() {
            return self.commit_entries(ctx);
        }
        self.broadcast(ctx, false)
    }

    fn broadcast(&mut self, ctx: &mut Context, heartbeat: bool) -> Result<()> {
        let peers: Vec<NodeId> = self.next_index.keys().copied().collect();
        for peer in peers {
            self.replicate(ctx, peer, heartbeat)?;
        }
        Ok(())
    }

    /// Send `peer` what it is missing: entries if the log still has them, the
    /// snapshot otherwise.
    fn replicate(&mut self, ctx: &mut Context, peer: NodeId, heartbeat: bool) -> Result<()> {
        let Some(&next) = self.next_index.get(&peer) else {
            return Ok(());
        };
        if next < ctx.log.first_index() {
            return self.send_snapshot(ctx, peer);
        }

        let (prev_log_index, prev_log_term, entries) =
            ctx.log.get_from(next, ctx.config.max_append_entries)?;
        if entries.is_empty() && !heartbeat {
            return Ok(());
        }
        let request = RaftMessage::AppendEntries(AppendEntries {
            term: ctx.current_term,
            leader_id: ctx.node_id,
            prev_log_index,
            prev_log_term,
            entries,
            commit_index: ctx.log.last_commit(),
        });
        ctx.send_to_peer(peer, request);
        Ok(())
    }

    fn send_snapshot(&mut self, ctx: &mut Context, peer: NodeId) -> Result<()> {
        let snapshot = ctx.persistence.read_snapshot()?;
        info!(
            node_id = ctx.node_id,
            peer,
            last_included_index = snapshot.last_included_index,
            "peer is behind the snapshot, sending it"
        );
        let request = RaftMessage::InstallSnapshot(InstallSnapshot {
            term: ctx.current_term,
            leader_id: ctx.node_id,
            last_included_index: snapshot.last_included_index,
            last_included_term: snapshot.last_included_term,
            data: snapshot.data,
        });
        ctx.send_to_peer(peer, request);
        Ok(())
    }

    /// Record a successful ack. Match never moves backwards.
    fn update_peer_index(&mut self, ctx: &Context, peer: NodeId, acked: Index) -> Index {
        let acked = acked.min(ctx.log.last_index());
        let matched = self.match_index.entry(peer).or_insert(0);
        *matched = (*matched).max(acked);
        let matched = *matched;
        self.next_index.insert(peer, matched + 1);
        matched
    }
}

fn reply_membership(ctx: &mut Context, client: &str, success: bool) {
    let reply = RaftMessage::CommandResponse(CommandResponse {
        success,
        cluster: Some(ctx.cluster.clone()),
        commit_index: Some(ctx.log.last_commit()),
        last_index: Some(ctx.log.last_index()),
        ..CommandResponse::default()
    });
    ctx.send(client, reply);
}
