// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator ports consumed by the executor.
//!
//! Asynchronous collaborators never call back into the executor directly:
//! they are handed a [`ModuleCompletion`] or [`ScheduledTask`] that posts an
//! event into the execution's inbound channel, so all graph work still
//! happens on the executor's own thread of control.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::executor::{ExecutorError, ExecutorEvent};
use crate::operation::{RequestDescriptor, RequestId};
use crate::response::ResponseChunk;
use crate::selection::NormalizationNode;

/// Cooperative cancellation flag shared by an execution and its work units.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives the execution's output.
pub trait ResponseSink {
    /// A batch was processed (or forwarded untouched).
    fn next(&self, batch: &[ResponseChunk]);
    /// The execution failed; no further calls follow.
    fn error(&self, error: &ExecutorError);
    /// The execution finished; no further calls follow.
    fn complete(&self);
}

/// Resolves `@module` operation references to split operations.
pub trait OperationLoader {
    /// Best-effort synchronous lookup.
    fn get(&self, reference: &str) -> Option<Arc<NormalizationNode>>;
    /// Starts an asynchronous load; the result is reported through `completion`.
    fn load(&self, reference: &str, completion: ModuleCompletion);
}

/// Handle returned by a [`TaskScheduler`] for later cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// Defers units of executor work.
pub trait TaskScheduler {
    /// Queues `task`; the scheduler calls [`ScheduledTask::run`] when it
    /// decides the work may proceed.
    fn schedule(&self, task: ScheduledTask) -> TaskHandle;
    /// Drops a queued task.
    fn cancel(&self, handle: TaskHandle);
}

/// Observes which other operations an execution's writes touched.
pub trait OperationTracker {
    /// `request`'s flush changed data read by `owners`.
    fn update(&self, request: &RequestDescriptor, owners: &[RequestId]);
    /// `request` has no further pending effects.
    fn complete(&self, request: &RequestDescriptor);
}

/// One-shot reply slot for an asynchronous module load.
#[derive(Debug)]
pub struct ModuleCompletion {
    pub(crate) unit: u64,
    pub(crate) sender: UnboundedSender<ExecutorEvent>,
    pub(crate) token: CancellationToken,
}

impl ModuleCompletion {
    /// Reports the loaded split operation (`None`: nothing to load).
    pub fn resolve(self, node: Option<Arc<NormalizationNode>>) {
        self.post(Ok(node));
    }

    /// Reports a load failure.
    pub fn reject(self, message: impl Into<String>) {
        self.post(Err(message.into()));
    }

    /// Returns `true` if the execution was cancelled meanwhile.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn post(self, result: Result<Option<Arc<NormalizationNode>>, String>) {
        if self.token.is_cancelled() {
            return;
        }
        // A closed channel means the executor is gone; nothing is waiting.
        let _ = self.sender.send(ExecutorEvent::ModuleLoaded {
            unit: self.unit,
            result,
        });
    }
}

/// Unit of executor work handed to a [`TaskScheduler`].
#[derive(Debug)]
pub struct ScheduledTask {
    pub(crate) unit: u64,
    pub(crate) sender: UnboundedSender<ExecutorEvent>,
    pub(crate) token: CancellationToken,
}

impl ScheduledTask {
    /// Lets the work proceed on the executor's next drain.
    pub fn run(self) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.sender.send(ExecutorEvent::RunTask(self.unit));
    }

    /// Returns `true` if the execution was cancelled meanwhile.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
