// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keyed collection of records forming (a delta of) the entity graph.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ident::DataId;
use crate::record::Record;

/// Entry stored for one id.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordState {
    /// The record exists.
    Existent(Arc<Record>),
    /// The record is known to not exist (deleted); publishing it removes the
    /// record from the target.
    Nonexistent,
}

/// Three-way status of an id in a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// A record is present.
    Existent,
    /// The id is tombstoned.
    Nonexistent,
    /// Nothing is known about the id.
    Unknown,
}

/// Mapping from [`DataId`] to record, iterated in id order.
///
/// Records are shared behind [`Arc`]; [`RecordSource::get_mut`] copies a
/// record on first write when it is shared with another source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordSource {
    records: BTreeMap<DataId, RecordState>,
}

impl RecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `id` when it exists.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        match self.records.get(id) {
            Some(RecordState::Existent(record)) => Some(record),
            _ => None,
        }
    }

    /// Returns the raw entry for `id`.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<&RecordState> {
        self.records.get(id)
    }

    /// Returns whether `id` exists, is tombstoned, or is unknown.
    #[must_use]
    pub fn status(&self, id: &str) -> RecordStatus {
        match self.records.get(id) {
            Some(RecordState::Existent(_)) => RecordStatus::Existent,
            Some(RecordState::Nonexistent) => RecordStatus::Nonexistent,
            None => RecordStatus::Unknown,
        }
    }

    /// Returns `true` if there is any entry (record or tombstone) for `id`.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Copy-on-write access to an existing record.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        match self.records.get_mut(id) {
            Some(RecordState::Existent(record)) => Some(Arc::make_mut(record)),
            _ => None,
        }
    }

    /// Inserts or replaces the record under its own id.
    pub fn set(&mut self, record: Record) {
        self.records
            .insert(record.id().clone(), RecordState::Existent(Arc::new(record)));
    }

    /// Inserts a shared record without copying it.
    pub fn set_shared(&mut self, record: Arc<Record>) {
        self.records
            .insert(record.id().clone(), RecordState::Existent(record));
    }

    /// Tombstones `id`.
    pub fn delete(&mut self, id: DataId) {
        self.records.insert(id, RecordState::Nonexistent);
    }

    /// Drops any entry for `id`, making it unknown again.
    pub fn remove(&mut self, id: &str) -> Option<RecordState> {
        self.records.remove(id)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of every entry, in order.
    pub fn ids(&self) -> impl Iterator<Item = &DataId> {
        self.records.keys()
    }

    /// Iterates over every entry, in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, &RecordState)> {
        self.records.iter()
    }
}

impl FromIterator<Record> for RecordSource {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut source = Self::new();
        for record in iter {
            source.set(record);
        }
        source
    }
}
