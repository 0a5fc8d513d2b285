// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Backing store: canonical records, optimistic overlay, retention, and
//! change notification.
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::debug;

use crate::constants::ROOT_TYPE;
use crate::ident::DataId;
use crate::operation::RequestId;
use crate::publish_queue::PublishError;
use crate::record::Record;
use crate::source::{RecordSource, RecordState, RecordStatus};

type RetainTable = RefCell<BTreeMap<RequestId, usize>>;

/// Keeps an operation's records reachable until disposed or dropped.
#[derive(Debug)]
pub struct RetainHandle {
    table: Weak<RetainTable>,
    request: RequestId,
    released: bool,
}

impl RetainHandle {
    /// Releases the retention; later calls are no-ops.
    pub fn dispose(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.borrow_mut();
        if let Some(count) = table.get_mut(&self.request) {
            *count -= 1;
            if *count == 0 {
                table.remove(&self.request);
            }
        }
    }
}

impl Drop for RetainHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Identifier of a store subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct Subscription {
    owner: RequestId,
    seen: BTreeSet<DataId>,
}

/// In-memory record store.
///
/// Writes land in the canonical source, or in the optimistic overlay while a
/// snapshot is active. [`Store::restore`] drops the overlay, so canonical
/// data written before the snapshot is all that remains.
#[derive(Debug)]
pub struct Store {
    base: RecordSource,
    optimistic: Option<RecordSource>,
    updated: BTreeSet<DataId>,
    retained: Rc<RetainTable>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_subscription: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Empty store holding only the root record.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(RecordSource::new())
    }

    /// Store over `source`; the root record is added if missing.
    #[must_use]
    pub fn with_source(mut source: RecordSource) -> Self {
        if source.get(crate::constants::ROOT_ID).is_none() {
            source.set(Record::new(DataId::root(), ROOT_TYPE));
        }
        Self {
            base: source,
            optimistic: None,
            updated: BTreeSet::new(),
            retained: Rc::new(RefCell::new(BTreeMap::new())),
            subscriptions: BTreeMap::new(),
            next_subscription: 0,
        }
    }

    /// Current view: the optimistic overlay if active, else canonical data.
    #[must_use]
    pub fn source(&self) -> &RecordSource {
        self.optimistic.as_ref().unwrap_or(&self.base)
    }

    /// Canonical data, ignoring any optimistic overlay.
    #[must_use]
    pub fn base(&self) -> &RecordSource {
        &self.base
    }

    /// Record for `id` in the current view.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.source().get(id)
    }

    /// Returns `true` while an optimistic overlay is active.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Starts an optimistic overlay over the current canonical data.
    pub fn snapshot(&mut self) -> Result<(), PublishError> {
        if self.optimistic.is_some() {
            return Err(PublishError::SnapshotExists);
        }
        debug!("store snapshot");
        self.optimistic = Some(self.base.clone());
        Ok(())
    }

    /// Drops the optimistic overlay; every id it changed counts as updated.
    pub fn restore(&mut self) -> Result<(), PublishError> {
        let overlay = self.optimistic.take().ok_or(PublishError::NoSnapshot)?;
        for (id, state) in overlay.iter() {
            let unchanged = match (state, self.base.state(id.as_str())) {
                (RecordState::Existent(a), Some(RecordState::Existent(b))) => Arc::ptr_eq(a, b),
                (RecordState::Nonexistent, Some(RecordState::Nonexistent)) => true,
                _ => false,
            };
            if !unchanged {
                self.updated.insert(id.clone());
            }
        }
        debug!(updated = self.updated.len(), "store restore");
        Ok(())
    }

    /// Merges a delta into the current view.
    ///
    /// Records merge field by field; a record whose fields all match keeps
    /// its `Arc` identity and is not reported as updated. Tombstones delete.
    pub fn publish(&mut self, source: &RecordSource) -> Result<(), PublishError> {
        let target = match &mut self.optimistic {
            Some(overlay) => overlay,
            None => &mut self.base,
        };
        for (id, state) in source.iter() {
            match state {
                RecordState::Nonexistent => {
                    if target.status(id.as_str()) != RecordStatus::Nonexistent {
                        target.delete(id.clone());
                        self.updated.insert(id.clone());
                    }
                }
                RecordState::Existent(next) => {
                    let mut merged = match target.get(id.as_str()) {
                        Some(prev) => {
                            let merged = Record::update(prev, next)?;
                            if Arc::ptr_eq(&merged, prev) {
                                continue;
                            }
                            merged
                        }
                        None => Arc::new(next.thaw()),
                    };
                    if let Some(record) = Arc::get_mut(&mut merged) {
                        record.freeze();
                    }
                    target.set_shared(merged);
                    self.updated.insert(id.clone());
                }
            }
        }
        Ok(())
    }

    /// Retains `request`'s data until the handle is disposed.
    pub fn retain(&self, request: &RequestId) -> RetainHandle {
        *self
            .retained
            .borrow_mut()
            .entry(request.clone())
            .or_insert(0) += 1;
        RetainHandle {
            table: Rc::downgrade(&self.retained),
            request: request.clone(),
            released: false,
        }
    }

    /// Returns `true` while any handle retains `request`.
    #[must_use]
    pub fn is_retained(&self, request: &RequestId) -> bool {
        self.retained.borrow().contains_key(request)
    }

    /// Total number of live retain handles.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.borrow().values().sum()
    }

    /// Registers `owner`'s interest in `seen` ids.
    pub fn subscribe(
        &mut self,
        owner: RequestId,
        seen: impl IntoIterator<Item = DataId>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                owner,
                seen: seen.into_iter().collect(),
            },
        );
        id
    }

    /// Removes a subscription.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }

    /// Ids updated since the last [`Store::notify`].
    pub fn updated_ids(&self) -> impl Iterator<Item = &DataId> {
        self.updated.iter()
    }

    /// Returns the owners whose seen ids were updated since the last call,
    /// excluding `source_operation`, and resets the update set.
    pub fn notify(&mut self, source_operation: Option<&RequestId>) -> Vec<RequestId> {
        let updated = std::mem::take(&mut self.updated);
        let mut owners: Vec<RequestId> = Vec::new();
        for subscription in self.subscriptions.values() {
            if Some(&subscription.owner) == source_operation
                || owners.contains(&subscription.owner)
            {
                continue;
            }
            if subscription.seen.iter().any(|id| updated.contains(id)) {
                owners.push(subscription.owner.clone());
            }
        }
        debug!(updated = updated.len(), owners = owners.len(), "store notify");
        owners
    }
}
