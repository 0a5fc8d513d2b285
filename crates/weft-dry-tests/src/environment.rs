// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store, publish queue and executor wiring for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use weft_core::{
    ActorId, ActorQueues, DataId, EngineConfig, ExecutionHandle, ExecutionRegistry, Executor,
    ExecutorConfig, HandleFieldHandler, HandlerProvider, HandlerRegistry, IdGenerator,
    OperationDescriptor, PublishQueue, PublishQueueProvider, Record, Store,
};

use crate::loader::InMemoryOperationLoader;
use crate::scheduler::ManualScheduler;
use crate::sink::RecordingSink;
use crate::tracker::RecordingTracker;

/// Builder for [`TestEnvironment`].
///
/// # Example
///
/// ```
/// use weft_core::Selection;
/// use weft_dry_tests::{operation, query, EnvironmentBuilder};
///
/// let env = EnvironmentBuilder::new().build();
/// let op = query(operation("Q", vec![Selection::scalar("count")]), serde_json::Value::Null);
/// let (mut executor, handle) = env.execute(op);
/// handle.next_chunk(weft_core::ResponseChunk::data(
///     serde_json::json!({"count": 3}).as_object().cloned().unwrap_or_default(),
/// ));
/// handle.complete();
/// executor.drain();
/// assert_eq!(env.value("client:root", "count"), Some(serde_json::json!(3)));
/// assert_eq!(env.sink.complete_count(), 1);
/// ```
#[derive(Default)]
pub struct EnvironmentBuilder {
    handlers: HandlerRegistry,
    loader: Option<InMemoryOperationLoader>,
    scheduler: Option<ManualScheduler>,
    engine: EngineConfig,
    actors: Vec<ActorId>,
}

impl EnvironmentBuilder {
    /// Default engine configuration, no loader, no scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle-field handler.
    #[must_use]
    pub fn with_handler(mut self, handle: &str, handler: Rc<dyn HandleFieldHandler>) -> Self {
        self.handlers.register(handle, handler);
        self
    }

    /// Resolves `@module` references with `loader`.
    #[must_use]
    pub fn with_loader(mut self, loader: InMemoryOperationLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Routes executor work through a [`ManualScheduler`].
    #[must_use]
    pub fn with_scheduler(mut self) -> Self {
        self.scheduler = Some(ManualScheduler::new());
        self
    }

    /// Engine configuration handed to every execution.
    #[must_use]
    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Adds a partition with its own store.
    #[must_use]
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actors.push(ActorId::from(actor));
        self
    }

    /// Builds the environment.
    pub fn build(self) -> TestEnvironment {
        let handlers: Rc<dyn HandlerProvider> = Rc::new(self.handlers);
        let store = Rc::new(RefCell::new(Store::new()));
        let queue = PublishQueue::new(Rc::clone(&store), Some(Rc::clone(&handlers)));
        let mut partitions = BTreeMap::new();
        let mut provider = ActorQueues::new().with(self.engine.actor(), queue.clone());
        for actor in self.actors {
            let partition = PublishQueue::new(
                Rc::new(RefCell::new(Store::new())),
                Some(Rc::clone(&handlers)),
            );
            provider = provider.with(actor.clone(), partition.clone());
            partitions.insert(actor, partition);
        }
        TestEnvironment {
            store,
            queue,
            queues: Rc::new(provider),
            partitions,
            sink: RecordingSink::new(),
            tracker: RecordingTracker::new(),
            registry: ExecutionRegistry::new(),
            ids: IdGenerator::new(),
            loader: self.loader,
            scheduler: self.scheduler,
            engine: self.engine,
        }
    }
}

/// One store per partition plus recording collaborators.
pub struct TestEnvironment {
    /// Store of the default actor.
    pub store: Rc<RefCell<Store>>,
    /// Queue of the default actor.
    pub queue: PublishQueue,
    /// Provider handed to executors.
    pub queues: Rc<dyn PublishQueueProvider>,
    /// Queues of the extra partitions.
    pub partitions: BTreeMap<ActorId, PublishQueue>,
    /// Sink shared by every execution.
    pub sink: RecordingSink,
    /// Tracker shared by every execution.
    pub tracker: RecordingTracker,
    /// Activity registry shared by every execution.
    pub registry: ExecutionRegistry,
    /// Id source shared by every execution.
    pub ids: IdGenerator,
    /// Loader, when configured.
    pub loader: Option<InMemoryOperationLoader>,
    /// Scheduler, when configured.
    pub scheduler: Option<ManualScheduler>,
    engine: EngineConfig,
}

impl TestEnvironment {
    /// Executor configuration with every collaborator wired in.
    pub fn config(&self, operation: OperationDescriptor) -> ExecutorConfig {
        let mut config = ExecutorConfig::new(
            operation,
            Rc::clone(&self.queues),
            Rc::new(self.sink.clone()),
        )
        .with_tracker(Rc::new(self.tracker.clone()))
        .with_registry(self.registry.clone())
        .with_engine_config(self.engine.clone())
        .with_id_generator(self.ids.clone());
        if let Some(loader) = &self.loader {
            config = config.with_loader(Rc::new(loader.clone()));
        }
        if let Some(scheduler) = &self.scheduler {
            config = config.with_scheduler(Rc::new(scheduler.clone()));
        }
        config
    }

    /// Starts an execution of `operation`.
    pub fn execute(&self, operation: OperationDescriptor) -> (Executor, ExecutionHandle) {
        Executor::new(self.config(operation))
    }

    /// Store serving `actor`.
    pub fn store_for(&self, actor: &str) -> Option<Rc<RefCell<Store>>> {
        self.partitions
            .get(&ActorId::from(actor))
            .map(|queue| Rc::clone(queue.store()))
    }

    /// Record `id` in the default store's current view.
    pub fn record(&self, id: &str) -> Option<Arc<Record>> {
        self.store.borrow().get(id).cloned()
    }

    /// Scalar `key` of record `id`; `None` if either is missing.
    pub fn value(&self, id: &str, key: &str) -> Option<Value> {
        self.record(id).and_then(|r| r.value(key).ok().flatten())
    }

    /// Single link `key` of record `id`.
    pub fn linked_id(&self, id: &str, key: &str) -> Option<DataId> {
        self.record(id)
            .and_then(|r| r.linked_id(key).ok().flatten().cloned())
    }

    /// Plural link `key` of record `id`.
    pub fn linked_ids(&self, id: &str, key: &str) -> Option<Vec<Option<DataId>>> {
        self.record(id)
            .and_then(|r| r.linked_ids(key).ok().flatten().map(<[Option<DataId>]>::to_vec))
    }
}
