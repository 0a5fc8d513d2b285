// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Execution state machine: drives one operation's response stream into the
//! record graph.
//!
//! An [`Executor`] owns a single inbound channel. The transport feeds it
//! through an [`ExecutionHandle`]; module loads and scheduled tasks report
//! back through the same channel. Each event is processed to completion
//! before the next one is read, so no reader ever observes a partially
//! normalized chunk.
//!
//! States move `Started → {LoadingIncremental, LoadingFinal} → Completed`.
//! Every fallible step returns an [`ExecutorError`]; the event loop turns any
//! error into cancellation plus a terminal [`ResponseSink::error`].
mod followup;
mod incremental;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::activity::{Activity, ExecutionRegistry};
use crate::config::EngineConfig;
use crate::constants::{ROOT_TYPE, SUBSCRIPTION_ROOT_ID_KEY};
use crate::ident::{ActorId, DataId, IdGenerator};
use crate::normalizer::{
    normalize_into_new_source, DefaultIdResolver, EntityIdResolver, NormalizeError,
    NormalizeOptions,
};
use crate::operation::{OperationDescriptor, RequestId};
use crate::payload::{ModuleImportPayload, NormalizationPayload};
use crate::ports::{
    CancellationToken, ModuleCompletion, OperationLoader, OperationTracker, ResponseSink,
    ScheduledTask, TaskHandle, TaskScheduler,
};
use crate::publish_queue::{PublishError, PublishQueue, PublishQueueProvider, StoreUpdater, UpdateId};
use crate::record::RecordError;
use crate::response::{PathSegment, ResponseChunk, ResponseData, ResponseError, TransportError};
use crate::selection::{NormalizationNode, Selector, Variables};
use crate::store::RetainHandle;

use incremental::{IncrementalResponse, IncrementalResults, ParentEntry};

/// Unit id of the network subscription opened at construction.
const NETWORK_UNIT: u64 = 0;

/// Failures that terminate an execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    /// A chunk had `data: null` and carried errors.
    #[error("No data returned for operation `{operation}`, got error(s):\n{messages}")]
    NoData {
        /// Operation name.
        operation: String,
        /// Variables the operation ran with.
        variables: Variables,
        /// Raw server errors.
        errors: Vec<ResponseError>,
        /// Messages joined by newlines (`(No errors)` when the list was empty).
        messages: String,
    },
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An optimistic chunk was batched with other chunks.
    #[error("optimistic responses cannot be batched")]
    OptimisticBatched,
    /// An optimistic chunk arrived after server data.
    #[error("optimistic payload received after server payload")]
    OptimisticAfterServer,
    /// A second optimistic payload was applied.
    #[error("only one optimistic response is supported per execution")]
    MultipleOptimistic,
    /// An optimistic payload produced incremental placeholders.
    #[error("optimistic responses cannot be returned for operations that use @defer or @stream")]
    OptimisticIncremental,
    /// A chunk carried only one of `label` and `path`.
    #[error("operation `{operation}` received a payload with only one of label and path set (label: {label:?}, path: {path:?})")]
    IncompleteIncrementalMetadata {
        /// Operation name.
        operation: String,
        /// Label, if present.
        label: Option<String>,
        /// Path, if present.
        path: Option<Vec<PathSegment>>,
    },
    /// An incremental chunk met a placeholder of the other kind.
    #[error("expected data for path `{path}` for label `{label}` to be data for {expected}, was {found}")]
    PlaceholderMismatch {
        /// Chunk label.
        label: String,
        /// Lookup key of the chunk's path.
        path: String,
        /// Directive the chunk label implies.
        expected: &'static str,
        /// Directive the registered placeholder came from.
        found: &'static str,
    },
    /// A placeholder's parent record is missing from its payload.
    #[error("expected record `{0}` to exist")]
    MissingParentRecord(DataId),
    /// Incremental data arrived for a parent that was never registered.
    #[error("expected the parent record `{0}` for incremental data to exist")]
    UnregisteredParent(DataId),
    /// `@stream` was applied to something other than a plural linked field.
    #[error("expected @stream to be used on a plural field")]
    StreamOnNonPluralField,
    /// The streamed field was never fetched on the parent.
    #[error("expected record `{id}` to have fetched field `{field}` with @stream")]
    StreamFieldNotFetched {
        /// Parent record.
        id: DataId,
        /// Streamed field name.
        field: String,
    },
    /// A streamed chunk's path did not end in a list index.
    #[error("expected path for @stream to end in a positive integer index, got `{0}`")]
    StreamIndex(String),
    /// A streamed item's index lies too far past the end of the list.
    #[error("@stream index {index} is out of range for a list of length {len}")]
    StreamIndexOutOfRange {
        /// Index reported by the server.
        index: usize,
        /// Length of the list this execution last observed.
        len: usize,
    },
    /// A streamed item had no type.
    #[error("expected @stream field `{0}` to have a __typename")]
    StreamTypename(String),
    /// A `@module` follow-up arrived but no loader is configured.
    #[error("expected an operation loader to be configured when using @module")]
    MissingOperationLoader,
    /// The loader failed to produce a split operation.
    #[error("failed to load operation `{reference}`: {message}")]
    ModuleLoad {
        /// Operation reference.
        reference: String,
        /// Loader-provided reason.
        message: String,
    },
    /// Normalization failed.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// Publishing failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// A cached parent record rejected an update.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Input to an execution's event loop.
#[derive(Debug)]
pub enum ExecutorEvent {
    /// A batch of response chunks.
    Next(Vec<ResponseChunk>),
    /// The transport failed.
    Error(TransportError),
    /// The transport will send nothing more.
    Complete,
    /// The caller gave up on the execution.
    Cancel,
    /// An asynchronous module load finished.
    ModuleLoaded {
        /// Unit the load was registered under.
        unit: u64,
        /// The split operation, `None` if nothing was found, or a failure.
        result: Result<Option<Arc<NormalizationNode>>, String>,
    },
    /// A scheduled task may run.
    RunTask(u64),
}

/// Lifecycle of an execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    /// No server data yet.
    Started,
    /// Server data arrived; more incremental chunks may follow.
    LoadingIncremental,
    /// The server promised no further chunks.
    LoadingFinal,
    /// Terminal.
    Completed,
}

/// Optimistic data applied when the execution starts.
#[derive(Clone, Default)]
pub struct OptimisticResponse {
    /// Response data normalized against the root selector.
    pub data: Option<ResponseData>,
    /// Updater run after (or instead of) the data.
    pub updater: Option<StoreUpdater>,
}

impl fmt::Debug for OptimisticResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticResponse")
            .field("data", &self.data)
            .field("updater", &self.updater.is_some())
            .finish()
    }
}

/// Everything an execution needs besides its event stream.
pub struct ExecutorConfig {
    operation: OperationDescriptor,
    queues: Rc<dyn PublishQueueProvider>,
    sink: Rc<dyn ResponseSink>,
    loader: Option<Rc<dyn OperationLoader>>,
    scheduler: Option<Rc<dyn TaskScheduler>>,
    tracker: Option<Rc<dyn OperationTracker>>,
    registry: ExecutionRegistry,
    engine: EngineConfig,
    id_resolver: Rc<dyn EntityIdResolver>,
    ids: IdGenerator,
    optimistic: Option<OptimisticResponse>,
    updater: Option<StoreUpdater>,
    actor: Option<ActorId>,
    client_payload: bool,
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("operation", &self.operation.request.identifier)
            .field("engine", &self.engine)
            .field("actor", &self.actor)
            .field("client_payload", &self.client_payload)
            .finish_non_exhaustive()
    }
}

impl ExecutorConfig {
    /// Minimal configuration: publish through `queues`, report to `sink`.
    pub fn new(
        operation: OperationDescriptor,
        queues: Rc<dyn PublishQueueProvider>,
        sink: Rc<dyn ResponseSink>,
    ) -> Self {
        Self {
            operation,
            queues,
            sink,
            loader: None,
            scheduler: None,
            tracker: None,
            registry: ExecutionRegistry::new(),
            engine: EngineConfig::default(),
            id_resolver: Rc::new(DefaultIdResolver),
            ids: IdGenerator::new(),
            optimistic: None,
            updater: None,
            actor: None,
            client_payload: false,
        }
    }

    /// Resolves `@module` references with `loader`.
    #[must_use]
    pub fn with_loader(mut self, loader: Rc<dyn OperationLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Routes every unit of work through `scheduler`.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Rc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Reports touched owners to `tracker`.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Rc<dyn OperationTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Shares `registry` with other executions.
    #[must_use]
    pub fn with_registry(mut self, registry: ExecutionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Normalization policy and default actor.
    #[must_use]
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Entity identity hook.
    #[must_use]
    pub fn with_id_resolver(mut self, resolver: Rc<dyn EntityIdResolver>) -> Self {
        self.id_resolver = resolver;
        self
    }

    /// Id source for subscription roots; share it across executions.
    #[must_use]
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Applies `optimistic` before any server data.
    #[must_use]
    pub fn with_optimistic(mut self, optimistic: OptimisticResponse) -> Self {
        self.optimistic = Some(optimistic);
        self
    }

    /// Runs `updater` after every root payload commit.
    #[must_use]
    pub fn with_updater(mut self, updater: StoreUpdater) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Overrides the engine's default actor.
    #[must_use]
    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Marks the data as client-originated: deferred fragments are walked
    /// eagerly instead of awaiting incremental chunks.
    #[must_use]
    pub fn client_payload(mut self) -> Self {
        self.client_payload = true;
        self
    }
}

/// Sending half of an execution's inbound channel.
///
/// `Send`, so a transport may feed it from another task or thread.
#[derive(Clone, Debug)]
pub struct ExecutionHandle {
    sender: UnboundedSender<ExecutorEvent>,
    token: CancellationToken,
}

impl ExecutionHandle {
    /// Delivers a batch. Returns `false` once the executor is gone.
    pub fn next(&self, batch: Vec<ResponseChunk>) -> bool {
        self.send(ExecutorEvent::Next(batch))
    }

    /// Delivers a single chunk.
    pub fn next_chunk(&self, chunk: ResponseChunk) -> bool {
        self.next(vec![chunk])
    }

    /// Reports a transport failure.
    pub fn error(&self, error: TransportError) -> bool {
        self.send(ExecutorEvent::Error(error))
    }

    /// Reports that the transport is done.
    pub fn complete(&self) -> bool {
        self.send(ExecutorEvent::Complete)
    }

    /// Cancels the execution.
    pub fn cancel(&self) -> bool {
        self.token.cancel();
        self.send(ExecutorEvent::Cancel)
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn send(&self, event: ExecutorEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Debug)]
enum Unit {
    Network,
    ModuleLoad,
    Task(TaskHandle),
}

enum PendingTask {
    Next(Vec<ResponseChunk>),
    PublishModule {
        payload: ModuleImportPayload,
        node: Arc<NormalizationNode>,
    },
}

enum PendingLoad {
    Followup(ModuleImportPayload),
    Optimistic(ModuleImportPayload),
}

/// Drives one operation's response stream into the graph.
pub struct Executor {
    operation: OperationDescriptor,
    state: ExecutionState,
    receiver: UnboundedReceiver<ExecutorEvent>,
    sender: UnboundedSender<ExecutorEvent>,
    token: CancellationToken,
    queues: Rc<dyn PublishQueueProvider>,
    sink: Rc<dyn ResponseSink>,
    loader: Option<Rc<dyn OperationLoader>>,
    scheduler: Option<Rc<dyn TaskScheduler>>,
    tracker: Option<Rc<dyn OperationTracker>>,
    registry: ExecutionRegistry,
    options: NormalizeOptions,
    ids: IdGenerator,
    updater: Option<StoreUpdater>,
    client_payload: bool,
    actor: ActorId,
    seen_actors: BTreeSet<ActorId>,
    units: BTreeMap<u64, Unit>,
    next_unit: u64,
    tasks: BTreeMap<u64, PendingTask>,
    loads: BTreeMap<u64, PendingLoad>,
    pending_modules: usize,
    incremental_pending: bool,
    incremental_results: IncrementalResults,
    parents: BTreeMap<DataId, ParentEntry>,
    optimistic_updates: Option<Vec<(ActorId, UpdateId)>>,
    retained: Option<RetainHandle>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("operation", &self.operation.request.identifier)
            .field("state", &self.state)
            .field("actor", &self.actor)
            .field("units", &self.units)
            .field("pending_modules", &self.pending_modules)
            .field("incremental_pending", &self.incremental_pending)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Starts an execution and applies its optimistic response, if any.
    pub fn new(config: ExecutorConfig) -> (Self, ExecutionHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = ExecutionHandle {
            sender: sender.clone(),
            token: token.clone(),
        };
        let mut options = NormalizeOptions::from_config(&config.engine);
        options.id_resolver = config.id_resolver;
        let actor = config.actor.unwrap_or_else(|| config.engine.actor());
        let mut executor = Self {
            operation: config.operation,
            state: ExecutionState::Started,
            receiver,
            sender,
            token,
            queues: config.queues,
            sink: config.sink,
            loader: config.loader,
            scheduler: config.scheduler,
            tracker: config.tracker,
            registry: config.registry,
            options,
            ids: config.ids,
            updater: config.updater,
            client_payload: config.client_payload,
            actor,
            seen_actors: BTreeSet::new(),
            units: BTreeMap::from([(NETWORK_UNIT, Unit::Network)]),
            next_unit: NETWORK_UNIT + 1,
            tasks: BTreeMap::new(),
            loads: BTreeMap::new(),
            pending_modules: 0,
            incremental_pending: false,
            incremental_results: IncrementalResults::new(),
            parents: BTreeMap::new(),
            optimistic_updates: None,
            retained: None,
        };
        executor.update_activity();
        debug!(operation = %executor.operation.request.identifier, "execution started");
        if let Some(optimistic) = config.optimistic {
            if let Err(error) =
                executor.process_optimistic_response(optimistic.data.as_ref(), optimistic.updater)
            {
                executor.fail(error);
            }
        }
        (executor, handle)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Returns `true` once the execution reached its terminal state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    /// The operation as currently anchored (subscription roots move per push).
    #[must_use]
    pub fn operation(&self) -> &OperationDescriptor {
        &self.operation
    }

    /// Number of `@module` loads still outstanding.
    #[must_use]
    pub fn pending_module_count(&self) -> usize {
        self.pending_modules
    }

    /// Returns `true` while this execution retains its data in the store.
    #[must_use]
    pub fn is_retaining(&self) -> bool {
        self.retained.is_some()
    }

    /// Processes every event already queued. Returns how many were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while !self.is_completed() {
            let Ok(event) = self.receiver.try_recv() else {
                break;
            };
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Processes events as they arrive until the execution completes.
    pub async fn run(&mut self) {
        while !self.is_completed() {
            match self.receiver.recv().await {
                Some(event) => self.handle(event),
                None => break,
            }
        }
    }

    /// Processes one event. Errors terminate the execution.
    pub fn handle(&mut self, event: ExecutorEvent) {
        if self.is_completed() {
            trace!(?event, "event ignored after completion");
            return;
        }
        let result = match event {
            ExecutorEvent::Next(batch) => self.on_next(batch),
            ExecutorEvent::Error(error) => Err(ExecutorError::Transport(error)),
            ExecutorEvent::Complete => {
                self.complete_unit(NETWORK_UNIT);
                Ok(())
            }
            ExecutorEvent::Cancel => {
                self.cancel();
                Ok(())
            }
            ExecutorEvent::ModuleLoaded { unit, result } => self.on_module_loaded(unit, result),
            ExecutorEvent::RunTask(unit) => self.on_run_task(unit),
        };
        if let Err(error) = result {
            self.fail(error);
        }
    }

    /// Tears the execution down: cancels outstanding work, reverts the
    /// optimistic overlay, releases retention. No-op once completed.
    pub fn cancel(&mut self) {
        if self.is_completed() {
            return;
        }
        self.state = ExecutionState::Completed;
        self.token.cancel();
        self.registry.remove(&self.operation.request.identifier);
        for (_, unit) in std::mem::take(&mut self.units) {
            if let (Unit::Task(handle), Some(scheduler)) = (unit, &self.scheduler) {
                scheduler.cancel(handle);
            }
        }
        self.tasks.clear();
        self.loads.clear();
        if let Some(updates) = self.optimistic_updates.take() {
            let reverted = self
                .revert_optimistic(updates)
                .and_then(|()| self.run_publish_queues(None));
            if let Err(error) = reverted {
                warn!(%error, "failed to revert optimistic updates on cancel");
            }
        }
        self.incremental_results.clear();
        self.parents.clear();
        self.complete_tracker();
        if let Some(mut retained) = self.retained.take() {
            retained.dispose();
        }
        debug!(operation = %self.operation.request.identifier, "execution completed");
    }

    fn fail(&mut self, error: ExecutorError) {
        warn!(operation = %self.operation.request.identifier, %error, "execution failed");
        self.cancel();
        self.sink.error(&error);
    }

    fn complete_unit(&mut self, unit: u64) {
        self.units.remove(&unit);
        if self.units.is_empty() {
            self.cancel();
            self.sink.complete();
        }
    }

    fn allocate_unit(&mut self) -> u64 {
        let id = self.next_unit;
        self.next_unit += 1;
        id
    }

    fn open_unit(&mut self, unit: Unit) -> u64 {
        let id = self.allocate_unit();
        self.units.insert(id, unit);
        id
    }

    fn module_completion(&self, unit: u64) -> ModuleCompletion {
        ModuleCompletion {
            unit,
            sender: self.sender.clone(),
            token: self.token.clone(),
        }
    }

    fn schedule(&mut self, scheduler: &Rc<dyn TaskScheduler>, task: PendingTask) -> u64 {
        let unit = self.allocate_unit();
        self.tasks.insert(unit, task);
        let handle = scheduler.schedule(ScheduledTask {
            unit,
            sender: self.sender.clone(),
            token: self.token.clone(),
        });
        self.units.insert(unit, Unit::Task(handle));
        self.update_activity();
        unit
    }

    fn on_next(&mut self, batch: Vec<ResponseChunk>) -> Result<(), ExecutorError> {
        if let Some(scheduler) = self.scheduler.clone() {
            let unit = self.schedule(&scheduler, PendingTask::Next(batch));
            trace!(unit, "batch scheduled");
            return Ok(());
        }
        self.handle_next(batch)?;
        self.maybe_complete_subscription_tracking();
        Ok(())
    }

    fn on_run_task(&mut self, unit: u64) -> Result<(), ExecutorError> {
        let Some(task) = self.tasks.remove(&unit) else {
            return Ok(());
        };
        match task {
            PendingTask::Next(batch) => {
                self.handle_next(batch)?;
                self.maybe_complete_subscription_tracking();
                self.complete_unit(unit);
            }
            PendingTask::PublishModule { payload, node } => {
                let published = self.publish_module(&payload, &node);
                self.pending_modules -= 1;
                published?;
                self.complete_unit(unit);
                self.after_module_settled();
            }
        }
        Ok(())
    }

    fn handle_next(&mut self, batch: Vec<ResponseChunk>) -> Result<(), ExecutorError> {
        if self.is_completed() {
            return Ok(());
        }
        let with_data = self.validate_batch(&batch)?;
        if with_data.is_empty() {
            if batch.iter().any(ResponseChunk::is_final) {
                self.transition(ExecutionState::LoadingFinal);
                self.incremental_pending = false;
            }
            self.sink.next(&batch);
            return Ok(());
        }
        if self.handle_optimistic(&batch, &with_data)? {
            self.sink.next(&batch);
            return Ok(());
        }
        let (roots, incremental) = self.partition(&batch, &with_data)?;
        let has_roots = !roots.is_empty();
        let mut root_ids = Vec::new();
        if has_roots {
            let (payloads, ids) = self.process_responses(roots)?;
            root_ids = ids;
            self.process_payload_followups(payloads)?;
        }
        if !incremental.is_empty() {
            let payloads = self.process_incremental_responses(incremental)?;
            self.process_payload_followups(payloads)?;
        }
        let mut batch = batch;
        if self.operation.is_subscription() {
            if root_ids.is_empty() {
                if let Some(&first) = with_data.first() {
                    root_ids.push((first, self.operation.root.data_id.clone()));
                }
            }
            for (index, root_id) in root_ids {
                if let Some(chunk) = batch.get_mut(index) {
                    chunk.extensions.get_or_insert_with(ResponseData::new).insert(
                        SUBSCRIPTION_ROOT_ID_KEY.to_owned(),
                        root_id.as_str().into(),
                    );
                }
            }
        }
        let source = has_roots.then(|| self.operation.request.identifier.clone());
        let owners = self.run_publish_queues(source.as_ref())?;
        if has_roots && self.incremental_pending {
            self.retain_data()?;
        }
        self.update_tracker(&owners);
        self.sink.next(&batch);
        Ok(())
    }

    /// Indices of chunks carrying data; a chunk with no data but with errors
    /// fails the batch.
    fn validate_batch(&self, batch: &[ResponseChunk]) -> Result<Vec<usize>, ExecutorError> {
        let mut with_data = Vec::with_capacity(batch.len());
        for (index, chunk) in batch.iter().enumerate() {
            match (&chunk.data, &chunk.errors) {
                (Some(_), _) => with_data.push(index),
                (None, None) => {}
                (None, Some(errors)) => {
                    let messages = if errors.is_empty() {
                        "(No errors)".to_owned()
                    } else {
                        errors
                            .iter()
                            .map(|e| e.message.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    };
                    return Err(ExecutorError::NoData {
                        operation: self.operation.request.name.clone(),
                        variables: self.operation.request.variables.clone(),
                        errors: errors.clone(),
                        messages,
                    });
                }
            }
        }
        Ok(with_data)
    }

    fn partition(
        &self,
        batch: &[ResponseChunk],
        with_data: &[usize],
    ) -> Result<(Vec<(usize, ResponseChunk)>, Vec<IncrementalResponse>), ExecutorError> {
        let mut roots = Vec::new();
        let mut incremental = Vec::new();
        for (index, chunk) in with_data.iter().filter_map(|&i| batch.get(i).map(|c| (i, c))) {
            match (&chunk.label, &chunk.path) {
                (None, None) => roots.push((index, chunk.clone())),
                (Some(label), Some(path)) => incremental.push(IncrementalResponse {
                    label: label.clone(),
                    path: path.clone(),
                    chunk: chunk.clone(),
                }),
                (label, path) => {
                    return Err(ExecutorError::IncompleteIncrementalMetadata {
                        operation: self.operation.request.name.clone(),
                        label: label.clone(),
                        path: path.clone(),
                    })
                }
            }
        }
        Ok((roots, incremental))
    }

    /// Reverts the optimistic overlay, resets incremental bookkeeping and
    /// commits each root chunk against the root selector.
    ///
    /// Subscriptions anchor every root chunk at a fresh local root; the
    /// returned pairs map batch indices to the root each chunk landed in.
    fn process_responses(
        &mut self,
        roots: Vec<(usize, ResponseChunk)>,
    ) -> Result<(Vec<NormalizationPayload>, Vec<(usize, DataId)>), ExecutorError> {
        if let Some(updates) = self.optimistic_updates.take() {
            self.revert_optimistic(updates)?;
        }
        self.incremental_pending = false;
        self.incremental_results.clear();
        self.parents.clear();
        let mut payloads = Vec::with_capacity(roots.len());
        let mut root_ids = Vec::new();
        for (index, chunk) in roots {
            if self.operation.is_subscription() {
                self.operation.root.data_id = self.ids.unique_id();
                root_ids.push((index, self.operation.root.data_id.clone()));
            }
            let root = self.operation.root.clone();
            let payload = self.normalize_chunk(&chunk, &root, ROOT_TYPE, Vec::new())?;
            self.queue_and_save_actor()?.commit_payload(
                &self.operation,
                payload.clone(),
                self.updater.clone(),
            );
            payloads.push(payload);
        }
        Ok((payloads, root_ids))
    }

    /// Applies state transitions, follow-ups and placeholders for freshly
    /// committed payloads.
    fn process_payload_followups(
        &mut self,
        payloads: Vec<NormalizationPayload>,
    ) -> Result<(), ExecutorError> {
        if self.is_completed() {
            return Ok(());
        }
        for payload in payloads {
            let next = if payload.is_final || self.state == ExecutionState::LoadingFinal {
                ExecutionState::LoadingFinal
            } else {
                ExecutionState::LoadingIncremental
            };
            self.transition(next);
            if payload.is_final {
                self.incremental_pending = false;
            }
            for followup in &payload.followup_payloads {
                self.process_followup(followup)?;
            }
            if payload.incremental_placeholders.is_empty() {
                continue;
            }
            self.incremental_pending = self.state != ExecutionState::LoadingFinal;
            for placeholder in &payload.incremental_placeholders {
                self.with_actor(placeholder.actor(), |this| {
                    this.process_incremental_placeholder(&payload, placeholder)
                })?;
            }
            if self.client_payload || self.state == ExecutionState::LoadingFinal {
                self.walk_deferred_eagerly(&payload)?;
            }
        }
        Ok(())
    }

    fn normalize_chunk(
        &self,
        chunk: &ResponseChunk,
        selector: &Selector,
        type_name: &str,
        path: Vec<PathSegment>,
    ) -> Result<NormalizationPayload, ExecutorError> {
        let empty = ResponseData::new();
        let data = chunk.data.as_ref().unwrap_or(&empty);
        self.normalize_data(data, chunk.errors.as_deref(), chunk.is_final(), selector, type_name, path)
    }

    fn normalize_data(
        &self,
        data: &ResponseData,
        errors: Option<&[ResponseError]>,
        is_final: bool,
        selector: &Selector,
        type_name: &str,
        path: Vec<PathSegment>,
    ) -> Result<NormalizationPayload, ExecutorError> {
        let options = self
            .options
            .with_path(path)
            .with_actor(Some(self.actor.clone()));
        let mut payload = normalize_into_new_source(selector, type_name, data, &options, errors)?;
        payload.is_final = is_final;
        Ok(payload)
    }

    /// Runs `f` with the current actor switched to `actor` (when given).
    fn with_actor<T>(
        &mut self,
        actor: Option<&ActorId>,
        f: impl FnOnce(&mut Self) -> Result<T, ExecutorError>,
    ) -> Result<T, ExecutorError> {
        let previous = actor.map(|a| std::mem::replace(&mut self.actor, a.clone()));
        let result = f(self);
        if let Some(previous) = previous {
            self.actor = previous;
        }
        result
    }

    fn queue_and_save_actor(&mut self) -> Result<PublishQueue, ExecutorError> {
        self.seen_actors.insert(self.actor.clone());
        Ok(self.queues.queue(&self.actor)?)
    }

    fn revert_optimistic(&self, updates: Vec<(ActorId, UpdateId)>) -> Result<(), ExecutorError> {
        for (actor, id) in updates {
            self.queues.queue(&actor)?.revert_update(id);
        }
        Ok(())
    }

    /// Flushes every queue this execution wrote to.
    fn run_publish_queues(&self, source: Option<&RequestId>) -> Result<Vec<RequestId>, ExecutorError> {
        let mut owners: Vec<RequestId> = Vec::new();
        for actor in &self.seen_actors {
            for owner in self.queues.queue(actor)?.run(source)? {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }
        Ok(owners)
    }

    fn retain_data(&mut self) -> Result<(), ExecutorError> {
        if self.retained.is_none() {
            let queue = self.queues.queue(&self.actor)?;
            let handle = queue.store().borrow().retain(&self.operation.request.identifier);
            self.retained = Some(handle);
        }
        Ok(())
    }

    fn update_tracker(&self, owners: &[RequestId]) {
        if owners.is_empty() {
            return;
        }
        if let Some(tracker) = &self.tracker {
            tracker.update(&self.operation.request, owners);
        }
    }

    fn complete_tracker(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.complete(&self.operation.request);
        }
    }

    fn maybe_complete_subscription_tracking(&self) {
        if self.is_completed() || !self.operation.is_subscription() {
            return;
        }
        if self.pending_modules == 0 && !self.incremental_pending {
            self.complete_tracker();
        }
    }

    fn after_module_settled(&mut self) {
        if self.is_completed() {
            return;
        }
        self.update_activity();
        self.maybe_complete_subscription_tracking();
    }

    fn transition(&mut self, next: ExecutionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "execution state");
        }
        self.state = next;
        self.update_activity();
    }

    fn update_activity(&self) {
        let activity = match self.state {
            ExecutionState::Started | ExecutionState::LoadingIncremental => Activity::Active,
            ExecutionState::LoadingFinal if self.pending_modules > 0 => Activity::Active,
            ExecutionState::LoadingFinal | ExecutionState::Completed => Activity::Inactive,
        };
        self.registry
            .set(&self.operation.request.identifier, activity);
    }
}
