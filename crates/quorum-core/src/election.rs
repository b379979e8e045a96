//! # election
//!
//! why: a candidate needs to know when a majority has granted it the term
//! relations: created and owned by role/candidate.rs for one voting round
//! what: Election tally, Vote record

use std::collections::HashMap;

use crate::{NodeId, Term};

/// One voter's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub term: Term,
    pub vote_granted: bool,
}

/// Tally of a single voting round. The first vote recorded per voter is final.
#[derive(Debug, Clone)]
pub struct Election {
    total: usize,
    majority: usize,
    votes: HashMap<NodeId, Vote>,
}

impl Election {
    /// A round over a cluster of `total` members.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            majority: total / 2 + 1,
            votes: HashMap::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    /// Number of voters heard from, granted or not.
    pub fn votes(&self) -> usize {
        self.votes.len()
    }

    pub fn granted_votes(&self) -> usize {
        self.votes.values().filter(|vote| vote.vote_granted).count()
    }

    /// Enough voters answered that the outcome is decided one way or the other.
    pub fn is_over(&self) -> bool {
        self.votes.len() >= self.majority
    }

    pub fn is_won(&self) -> bool {
        self.granted_votes() >= self.majority
    }

    pub fn highest_term(&self) -> Option<Term> {
        self.votes.values().map(|vote| vote.term).max()
    }

    /// Record `voter`'s vote unless it already voted in this round.
    pub fn receive_vote(&mut self, voter: NodeId, vote: Vote) {
        self.votes.entry(voter).or_insert(vote);
    }
}
