//! # log
//!
//! why: manage the replicated log suffix that survives compaction, plus its cursors
//! relations: owned by node.rs, read and mutated by the roles, compacted on save
//! what: LogContainer with snapshot-aware indexing, consistency checks, commit/apply cursors

use std::ops::RangeInclusive;

use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::persistence::{SnapshotMeta, StoredLog};
use crate::{Cluster, Index, Term};

/// The in-memory suffix of the replicated log.
///
/// Entries cover `first_index()..=last_index()`. Everything at or below the
/// snapshot boundary has been folded into application state. Cursors satisfy
/// `boundary <= last_applied <= last_commit <= last_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContainer {
    entries: Vec<LogEntry>,
    snapshot_last_included_index: Index,
    snapshot_last_included_term: Term,
    last_commit: Index,
    last_applied: Index,
}

impl LogContainer {
    /// An empty log with no snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty log that starts right after a snapshot boundary.
    pub fn with_snapshot(last_included_index: Index, last_included_term: Term) -> Self {
        Self::restore(last_included_index, last_included_term, Vec::new())
    }

    /// Rebuild a log from persisted entries that follow a snapshot boundary.
    pub fn restore(
        last_included_index: Index,
        last_included_term: Term,
        entries: Vec<LogEntry>,
    ) -> Self {
        Self {
            entries,
            snapshot_last_included_index: last_included_index,
            snapshot_last_included_term: last_included_term,
            last_commit: last_included_index,
            last_applied: last_included_index,
        }
    }

    /// Line a stored log suffix up with a snapshot boundary.
    ///
    /// Stored entries already folded into the snapshot are skipped. A stored
    /// suffix that starts after the boundary leaves a gap and is an error.
    pub fn from_stored(boundary: SnapshotMeta, stored: StoredLog) -> Result<Self> {
        let first_index = boundary.last_included_index + 1;
        if stored.entries.is_empty() {
            return Ok(Self::with_snapshot(
                boundary.last_included_index,
                boundary.last_included_term,
            ));
        }
        if stored.first_index > first_index {
            return Err(Error::Snapshot(format!(
                "stored log starts at {} but the snapshot ends at {}",
                stored.first_index, boundary.last_included_index
            )));
        }
        let skip = (first_index - stored.first_index) as usize;
        let entries = stored.entries.into_iter().skip(skip).collect();
        Ok(Self::restore(
            boundary.last_included_index,
            boundary.last_included_term,
            entries,
        ))
    }

    pub fn first_index(&self) -> Index {
        self.snapshot_last_included_index + 1
    }

    pub fn last_index(&self) -> Index {
        self.snapshot_last_included_index + self.entries.len() as Index
    }

    pub fn last_term(&self) -> Term {
        self.entries
            .last()
            .map(LogEntry::term)
            .unwrap_or(self.snapshot_last_included_term)
    }

    pub fn last_commit(&self) -> Index {
        self.last_commit
    }

    pub fn last_applied(&self) -> Index {
        self.last_applied
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot_meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            last_included_index: self.snapshot_last_included_index,
            last_included_term: self.snapshot_last_included_term,
        }
    }

    /// The retained entry at `index`, if any.
    pub fn get(&self, index: Index) -> Option<&LogEntry> {
        if index < self.first_index() {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// Like `get`, but a missing entry is an error.
    pub fn entry(&self, index: Index) -> Result<&LogEntry> {
        self.get(index).ok_or_else(|| self.out_of_range(index))
    }

    /// Term of the entry at `index`. The snapshot boundary itself has a term too.
    pub fn term(&self, index: Index) -> Result<Term> {
        if index == self.snapshot_last_included_index {
            return Ok(self.snapshot_last_included_term);
        }
        self.entry(index).map(LogEntry::term)
    }

    pub fn last_applied_term(&self) -> Result<Term> {
        self.term(self.last_applied)
    }

    /// Whether the log holds an entry at `index` written in `term`.
    ///
    /// Positions strictly below the snapshot boundary are committed history
    /// and match any leader's log, so they count as present.
    pub fn include(&self, index: Index, term: Term) -> bool {
        if index < self.snapshot_last_included_index {
            return true;
        }
        index <= self.last_index() && self.term(index).ok() == Some(term)
    }

    /// Append entries at the end of the log, returning the new last index.
    pub fn append(&mut self, entries: impl IntoIterator<Item = LogEntry>) -> Index {
        self.entries.extend(entries);
        self.last_index()
    }

    /// Drop every entry after `index`.
    pub fn truncate(&mut self, index: Index) {
        let keep = index.saturating_sub(self.snapshot_last_included_index) as usize;
        self.entries.truncate(keep);
    }

    /// Merge entries that follow position `index` into the log.
    ///
    /// Entries already present with the same term are kept as they are. At the
    /// first conflicting position the local suffix is discarded and the rest
    /// of `entries` appended. Returns the last position covered by `entries`,
    /// which is the index the log is now known to match the sender's through.
    pub fn replace_from(&mut self, index: Index, entries: Vec<LogEntry>) -> Result<Index> {
        if index > self.last_index() {
            return Err(self.out_of_range(index));
        }
        let mut position = index;
        for entry in entries {
            position += 1;
            if position <= self.snapshot_last_included_index {
                continue;
            }
            match self.get(position) {
                Some(existing) if existing.term() == entry.term() => {}
                Some(_) => {
                    if position <= self.last_commit {
                        return Err(Error::CommittedConflict { index: position });
                    }
                    self.truncate(position - 1);
                    self.entries.push(entry);
                }
                None => self.entries.push(entry),
            }
        }
        Ok(position)
    }

    /// Move the commit cursor forward to `index`, capped at the last entry.
    ///
    /// The cursor never moves backwards. Returns true when it ends up exactly
    /// at `index`.
    pub fn advance_commit_to(&mut self, index: Index) -> bool {
        let target = index.min(self.last_index());
        if target > self.last_commit {
            self.last_commit = target;
        }
        self.last_commit == index
    }

    /// Committed positions not yet delivered to the application.
    pub fn unapplied(&self) -> RangeInclusive<Index> {
        (self.last_applied + 1)..=self.last_commit
    }

    pub fn mark_applied(&mut self, index: Index) {
        debug_assert!(index <= self.last_commit, "applying past the commit point");
        if index > self.last_applied {
            self.last_applied = index.min(self.last_commit);
        }
    }

    /// Compaction policy: more than `max_entries` applied entries are retained.
    pub fn exceeds_limit(&self, max_entries: u64) -> bool {
        self.last_applied - self.snapshot_last_included_index > max_entries
    }

    /// Fold every applied entry into the snapshot boundary.
    pub fn drop_until_last_applied(&mut self) -> Result<SnapshotMeta> {
        let term = self.term(self.last_applied)?;
        let dropped = (self.last_applied - self.snapshot_last_included_index) as usize;
        self.entries.drain(..dropped);
        self.snapshot_last_included_index = self.last_applied;
        self.snapshot_last_included_term = term;
        Ok(self.snapshot_meta())
    }

    /// Entries starting at `index`, at most `max` of them, together with the
    /// position and term of the entry right before. Past the end of the log
    /// this describes the last entry and carries nothing.
    pub fn get_from(&self, index: Index, max: usize) -> Result<(Index, Term, Vec<LogEntry>)> {
        let last_index = self.last_index();
        if index > last_index {
            return Ok((last_index, self.last_term(), Vec::new()));
        }

        let prev_log_index = index.saturating_sub(1);
        let prev_log_term = self.term(prev_log_index)?;
        let send_up_to = last_index.min(index + max.max(1) as Index - 1);
        let entries = self.slice(index, send_up_to)?.to_vec();
        Ok((prev_log_index, prev_log_term, entries))
    }

    /// Retained entries in `from..=to`.
    pub fn slice(&self, from: Index, to: Index) -> Result<&[LogEntry]> {
        if from < self.first_index() {
            return Err(self.out_of_range(from));
        }
        if to > self.last_index() {
            return Err(self.out_of_range(to));
        }
        let start = (from - self.first_index()) as usize;
        let end = (to + 1).saturating_sub(self.first_index()) as usize;
        Ok(&self.entries[start..end.max(start)])
    }

    /// A membership change sits in the log but is not yet committed.
    pub fn reconfiguration_pending(&self) -> bool {
        ((self.last_commit + 1)..=self.last_index())
            .filter_map(|index| self.get(index))
            .any(LogEntry::is_config)
    }

    /// Membership carried by the most recent config entry still in the log.
    pub fn last_config(&self) -> Option<&Cluster> {
        self.entries.iter().rev().find_map(LogEntry::cluster)
    }

    /// Membership carried by the last config entry at or before `index`.
    pub fn config_through(&self, index: Index) -> Option<&Cluster> {
        let retained = index.saturating_sub(self.snapshot_last_included_index) as usize;
        self.entries[..retained.min(self.entries.len())]
            .iter()
            .rev()
            .find_map(LogEntry::cluster)
    }

    fn out_of_range(&self, index: Index) -> Error {
        Error::IndexOutOfRange {
            index,
            first: self.first_index(),
            last: self.last_index(),
        }
    }
}
