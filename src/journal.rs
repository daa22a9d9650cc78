//! Append-only transaction ledger for a single wallet.
//!
//! Entries are totally ordered by `seq`; `created_at` never decreases along that order.
//! The only mutation allowed after insertion is settling a `Pending` entry once.

use std::collections::HashMap;
use thiserror::Error;

use crate::model::{EntryId, EntryStatus, LedgerEntry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("duplicate ledger entry {0}")]
    DuplicateLedgerEntry(EntryId),

    #[error("ledger entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("ledger entry {entry} is already {status}")]
    EntryFrozen { entry: EntryId, status: EntryStatus },
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<LedgerEntry>,
    index: HashMap<EntryId, usize>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, assigning its sequence number.
    ///
    /// At-most-once: an id that is already present is rejected.
    pub fn append(&mut self, mut entry: LedgerEntry) -> Result<&LedgerEntry, JournalError> {
        if self.index.contains_key(&entry.id) {
            return Err(JournalError::DuplicateLedgerEntry(entry.id));
        }

        if let Some(last) = self.entries.last() {
            if entry.created_at < last.created_at {
                entry.created_at = last.created_at;
            }
        }
        entry.seq = self.entries.len() as u64 + 1;

        let idx = self.entries.len();
        self.index.insert(entry.id, idx);
        self.entries.push(entry);
        Ok(&self.entries[idx])
    }

    /// Move a `Pending` entry to `Completed` or `Failed`. Settled entries are frozen.
    pub fn settle(&mut self, id: EntryId, status: EntryStatus) -> Result<&LedgerEntry, JournalError> {
        let idx = *self.index.get(&id).ok_or(JournalError::EntryNotFound(id))?;
        let entry = &mut self.entries[idx];

        if entry.status != EntryStatus::Pending || status == EntryStatus::Pending {
            return Err(JournalError::EntryFrozen {
                entry: id,
                status: entry.status,
            });
        }

        entry.status = status;
        Ok(&self.entries[idx])
    }

    /// Entries strictly after `cursor` (a previously seen `seq`, 0 for everything).
    pub fn since(&self, cursor: u64) -> &[LedgerEntry] {
        let start = (cursor as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last_seq(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
