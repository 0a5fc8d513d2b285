// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serialized publication of canonical and optimistic changes into the store.
//!
//! Nothing reaches the [`Store`] until [`PublishQueue::run`]. A run flushes
//! in three steps:
//! 1. if a rebase is pending, drop the optimistic overlay;
//! 2. commit queued canonical data to the canonical source, in order;
//! 3. if optimistic updates exist, re-snapshot and replay every applied
//!    update in its original order, then any newly queued ones.
//!
//! Optimistic updates therefore always sit on top of whatever canonical data
//! exists at flush time, and reverting one never leaves residue.
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::handler::HandlerProvider;
use crate::ident::{ActorId, DataId};
use crate::mutator::RecordSourceProxy;
use crate::operation::{OperationDescriptor, RequestId};
use crate::payload::NormalizationPayload;
use crate::record::RecordError;
use crate::source::RecordSource;
use crate::store::Store;

/// Contract violations raised while publishing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// `run` was called from inside another `run`.
    #[error("a store update was detected within another store update; updaters must not run the publish queue")]
    ReentrantRun,
    /// A handle payload named a handler nobody registered.
    #[error("expected a handler to be provided for handle `{0}`")]
    MissingHandler(String),
    /// A write addressed a record that does not exist.
    #[error("cannot modify record `{0}`, the record does not exist")]
    MissingRecord(DataId),
    /// A create addressed an id that already exists.
    #[error("cannot create a record with id `{0}`, this record already exists")]
    RecordExists(DataId),
    /// `snapshot` while a snapshot is active.
    #[error("unexpected call to snapshot() while a previous snapshot exists")]
    SnapshotExists,
    /// `restore` without an active snapshot.
    #[error("unexpected call to restore(), expected a snapshot to exist")]
    NoSnapshot,
    /// No queue serves the actor.
    #[error("no publish queue for actor `{0}`")]
    UnknownActor(ActorId),
    /// An updater reported a failure of its own.
    #[error("store updater failed: {0}")]
    Updater(String),
    /// A record accessor rejected the write.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Store mutation callback run inside a flush.
pub type StoreUpdater = Rc<dyn Fn(&mut RecordSourceProxy<'_>) -> Result<(), PublishError>>;

/// Identity of an applied optimistic update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(u64);

/// Revertible mutation applied ahead of server data.
#[derive(Clone)]
pub enum OptimisticUpdate {
    /// A normalized payload, optionally followed by an updater.
    Payload {
        /// Records and handle payloads to write.
        payload: NormalizationPayload,
        /// Runs after the payload is written.
        updater: Option<StoreUpdater>,
    },
    /// A bare store updater.
    Updater(StoreUpdater),
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload { payload, updater } => f
                .debug_struct("Payload")
                .field("records", &payload.source.len())
                .field("updater", &updater.is_some())
                .finish(),
            Self::Updater(_) => f.write_str("Updater"),
        }
    }
}

enum PendingCommit {
    Payload {
        payload: NormalizationPayload,
        updater: Option<StoreUpdater>,
    },
    Updater(StoreUpdater),
    Source(RecordSource),
}

#[derive(Default)]
struct QueueState {
    pending_backup_rebase: bool,
    pending_data: Vec<PendingCommit>,
    pending_optimistic: Vec<(UpdateId, Rc<OptimisticUpdate>)>,
    applied_optimistic: Vec<(UpdateId, Rc<OptimisticUpdate>)>,
    next_update: u64,
}

struct Inner {
    store: Rc<RefCell<Store>>,
    handlers: Option<Rc<dyn HandlerProvider>>,
    state: RefCell<QueueState>,
    running: Cell<bool>,
}

/// Shared handle to one store's publish queue; clones address the same queue.
///
/// Updaters and handlers run while the store is mutably borrowed; they must
/// go through the [`RecordSourceProxy`] they are given and must not touch the
/// store directly.
#[derive(Clone)]
pub struct PublishQueue {
    inner: Rc<Inner>,
}

impl fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("PublishQueue")
            .field("pending_backup_rebase", &state.pending_backup_rebase)
            .field("pending_data", &state.pending_data.len())
            .field("pending_optimistic", &state.pending_optimistic.len())
            .field("applied_optimistic", &state.applied_optimistic.len())
            .finish_non_exhaustive()
    }
}

impl PublishQueue {
    /// Queue publishing into `store`, resolving handle payloads via `handlers`.
    pub fn new(store: Rc<RefCell<Store>>, handlers: Option<Rc<dyn HandlerProvider>>) -> Self {
        Self {
            inner: Rc::new(Inner {
                store,
                handlers,
                state: RefCell::new(QueueState::default()),
                running: Cell::new(false),
            }),
        }
    }

    /// The store this queue publishes into.
    #[must_use]
    pub fn store(&self) -> &Rc<RefCell<Store>> {
        &self.inner.store
    }

    /// Queues an optimistic update; it becomes visible on the next run.
    pub fn apply_update(&self, update: OptimisticUpdate) -> UpdateId {
        let mut state = self.inner.state.borrow_mut();
        let id = UpdateId(state.next_update);
        state.next_update += 1;
        state.pending_optimistic.push((id, Rc::new(update)));
        id
    }

    /// Reverts an optimistic update. Reverting an applied update schedules a
    /// rebase; reverting an unknown id is a no-op.
    pub fn revert_update(&self, id: UpdateId) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(index) = state.pending_optimistic.iter().position(|(u, _)| *u == id) {
            state.pending_optimistic.remove(index);
        } else if let Some(index) = state.applied_optimistic.iter().position(|(u, _)| *u == id) {
            state.applied_optimistic.remove(index);
            state.pending_backup_rebase = true;
        }
    }

    /// Reverts every optimistic update.
    pub fn revert_all(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.pending_backup_rebase = true;
        state.pending_optimistic.clear();
        state.applied_optimistic.clear();
    }

    /// Queues a server payload for `operation`.
    pub fn commit_payload(
        &self,
        operation: &OperationDescriptor,
        payload: NormalizationPayload,
        updater: Option<StoreUpdater>,
    ) {
        debug!(operation = %operation.request.name, records = payload.source.len(), "commit payload");
        self.push_commit(PendingCommit::Payload { payload, updater });
    }

    /// Queues a canonical store updater.
    pub fn commit_update(&self, updater: StoreUpdater) {
        self.push_commit(PendingCommit::Updater(updater));
    }

    /// Queues a raw record delta.
    pub fn commit_source(&self, source: RecordSource) {
        self.push_commit(PendingCommit::Source(source));
    }

    /// Number of optimistic updates currently applied to the store.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.inner.state.borrow().applied_optimistic.len()
    }

    /// Flushes queued work into the store and returns the owners whose data
    /// changed (excluding `source_operation`).
    pub fn run(&self, source_operation: Option<&RequestId>) -> Result<Vec<RequestId>, PublishError> {
        if self.inner.running.replace(true) {
            warn!("publish queue run re-entered from inside a store update");
            return Err(PublishError::ReentrantRun);
        }
        let result = self.flush(source_operation);
        self.inner.running.set(false);
        result
    }

    fn push_commit(&self, commit: PendingCommit) {
        let mut state = self.inner.state.borrow_mut();
        state.pending_backup_rebase = true;
        state.pending_data.push(commit);
    }

    fn flush(&self, source_operation: Option<&RequestId>) -> Result<Vec<RequestId>, PublishError> {
        let (rebase, pending_data) = {
            let mut state = self.inner.state.borrow_mut();
            (
                state.pending_backup_rebase,
                std::mem::take(&mut state.pending_data),
            )
        };
        let mut store = self.inner.store.borrow_mut();
        if rebase && store.has_snapshot() {
            store.restore()?;
        }
        let mut failed = None;
        for commit in pending_data {
            if let Err(error) = self.commit_data(&mut store, commit) {
                warn!(%error, "queued commit dropped");
                failed.get_or_insert(error);
            }
        }
        let (replay, pending) = {
            let mut state = self.inner.state.borrow_mut();
            let pending = std::mem::take(&mut state.pending_optimistic);
            let replay = if rebase {
                state.applied_optimistic.clone()
            } else {
                Vec::new()
            };
            state.applied_optimistic.extend(pending.iter().cloned());
            state.pending_backup_rebase = false;
            (replay, pending)
        };
        if !pending.is_empty() || !replay.is_empty() {
            if !store.has_snapshot() {
                store.snapshot()?;
            }
            self.apply_updates(&mut store, replay.iter().chain(pending.iter()))?;
        }
        // Updated ids stay recorded for the next successful run to report.
        if let Some(error) = failed {
            return Err(error);
        }
        let owners = store.notify(source_operation);
        debug!(
            rebase,
            replayed = replay.len(),
            applied = pending.len(),
            owners = owners.len(),
            "publish queue run"
        );
        Ok(owners)
    }

    fn commit_data(&self, store: &mut Store, commit: PendingCommit) -> Result<(), PublishError> {
        match commit {
            PendingCommit::Payload {
                mut payload,
                updater,
            } => {
                {
                    let mut proxy = RecordSourceProxy::new(
                        store.source(),
                        &mut payload.source,
                        self.inner.handlers.clone(),
                    );
                    proxy.apply_field_payloads(&payload.field_payloads)?;
                    if let Some(updater) = &updater {
                        updater(&mut proxy)?;
                    }
                }
                store.publish(&payload.source)
            }
            PendingCommit::Updater(updater) => {
                let mut sink = RecordSource::new();
                {
                    let mut proxy =
                        RecordSourceProxy::new(store.source(), &mut sink, self.inner.handlers.clone());
                    updater(&mut proxy)?;
                }
                store.publish(&sink)
            }
            PendingCommit::Source(source) => store.publish(&source),
        }
    }

    fn apply_updates<'u>(
        &self,
        store: &mut Store,
        updates: impl Iterator<Item = &'u (UpdateId, Rc<OptimisticUpdate>)>,
    ) -> Result<(), PublishError> {
        let mut sink = RecordSource::new();
        {
            let mut proxy =
                RecordSourceProxy::new(store.source(), &mut sink, self.inner.handlers.clone());
            for (_, update) in updates {
                match update.as_ref() {
                    OptimisticUpdate::Updater(updater) => updater(&mut proxy)?,
                    OptimisticUpdate::Payload { payload, updater } => {
                        proxy.publish_source(&payload.source, &payload.field_payloads)?;
                        if let Some(updater) = updater {
                            updater(&mut proxy)?;
                        }
                    }
                }
            }
        }
        store.publish(&sink)
    }
}

/// Maps actors to the queue that publishes their partition.
pub trait PublishQueueProvider {
    /// Queue for `actor`.
    fn queue(&self, actor: &ActorId) -> Result<PublishQueue, PublishError>;
}

/// Serves one queue for every actor.
#[derive(Clone, Debug)]
pub struct SingleQueueProvider(PublishQueue);

impl SingleQueueProvider {
    /// Wraps `queue`.
    pub fn new(queue: PublishQueue) -> Self {
        Self(queue)
    }
}

impl PublishQueueProvider for SingleQueueProvider {
    fn queue(&self, _actor: &ActorId) -> Result<PublishQueue, PublishError> {
        Ok(self.0.clone())
    }
}

/// One queue per actor partition.
#[derive(Clone, Debug, Default)]
pub struct ActorQueues {
    queues: BTreeMap<ActorId, PublishQueue>,
}

impl ActorQueues {
    /// No partitions yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `queue` for `actor`.
    #[must_use]
    pub fn with(mut self, actor: ActorId, queue: PublishQueue) -> Self {
        self.queues.insert(actor, queue);
        self
    }
}

impl PublishQueueProvider for ActorQueues {
    fn queue(&self, actor: &ActorId) -> Result<PublishQueue, PublishError> {
        self.queues
            .get(actor)
            .cloned()
            .ok_or_else(|| PublishError::UnknownActor(actor.clone()))
    }
}
