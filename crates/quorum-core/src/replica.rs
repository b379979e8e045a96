//! # replica
//!
//! why: a leader may only commit what a majority holds, and only entries from its own term
//! relations: used by role/leader.rs after every successful replication ack
//! what: ReplicaCounter computing the majority-agreed commit index

use std::collections::BTreeMap;

use crate::log::LogContainer;
use crate::{Index, NodeId, Term};

/// Computes the highest index present on a majority and written in the
/// current term.
pub struct ReplicaCounter<'a> {
    log: &'a LogContainer,
    match_indices: &'a BTreeMap<NodeId, Index>,
    current_term: Term,
}

impl<'a> ReplicaCounter<'a> {
    pub fn new(
        log: &'a LogContainer,
        match_indices: &'a BTreeMap<NodeId, Index>,
        current_term: Term,
    ) -> Self {
        Self {
            log,
            match_indices,
            current_term,
        }
    }

    /// The majority-agreed commit index.
    ///
    /// Each peer's match index is lowered to the nearest index at or below it
    /// written in the current term, or to the current commit if there is none.
    /// The leader contributes its own last index. The answer is the lower
    /// median of those values.
    pub fn majority_agreed_commit(&self) -> Index {
        let current_commit = self.log.last_commit();

        let mut indices: Vec<Index> = self
            .match_indices
            .values()
            .map(|&match_index| self.current_term_floor(match_index, current_commit))
            .collect();
        indices.push(self.log.last_index());
        indices.sort_unstable();

        let mut middle = indices.len() / 2;
        if indices.len() % 2 == 0 {
            middle -= 1;
        }
        indices[middle]
    }

    fn current_term_floor(&self, match_index: Index, current_commit: Index) -> Index {
        let top = match_index.min(self.log.last_index());
        (current_commit..=top)
            .rev()
            .find(|&index| self.log.term(index).ok() == Some(self.current_term))
            .unwrap_or(current_commit)
    }
}
