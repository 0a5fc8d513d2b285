// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weft-core: normalized record graph and response execution engine.
//!
//! Tree-shaped responses are flattened into a graph of id-addressed records
//! ([`normalize`]); an [`Executor`] drives one operation's chunk stream
//! (optimistic data, `@defer`/`@stream`, `@module` follow-ups, cross-actor
//! data) through a [`PublishQueue`] into a backing [`Store`].
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod activity;
/// Engine configuration and its storage port.
pub mod config;
/// Reserved keys and identifiers.
pub mod constants;
mod error_trie;
mod executor;
mod handler;
mod ident;
mod mutator;
mod normalizer;
mod operation;
mod payload;
/// Collaborator ports consumed by the executor.
pub mod ports;
mod publish_queue;
mod record;
mod response;
/// Compiled selection trees.
pub mod selection;
mod source;
/// Storage-key and variable-scope helpers.
pub mod storage_key;
mod store;

pub use activity::{Activity, ExecutionRegistry};
pub use config::{ConfigError, ConfigService, ConfigStore, EngineConfig};
pub use error_trie::ErrorTrie;
pub use executor::{
    ExecutionHandle, ExecutionState, Executor, ExecutorConfig, ExecutorError, ExecutorEvent,
    OptimisticResponse,
};
pub use handler::{HandleFieldHandler, HandlerProvider, HandlerRegistry};
pub use ident::{derive_id, is_local_id, type_record_id, ActorId, DataId, IdGenerator};
pub use mutator::RecordSourceProxy;
pub use normalizer::{
    normalize, normalize_into_new_source, DefaultIdResolver, EntityIdResolver, NormalizeError,
    NormalizeOptions,
};
pub use operation::{OperationDescriptor, OperationKind, RequestDescriptor, RequestId};
pub use payload::{
    ActorPayload, DeferPlaceholder, Diagnostic, DiagnosticKind, FollowupPayload,
    HandleFieldPayload, IncrementalPlaceholder, ModuleImportPayload, NormalizationPayload,
    StreamPlaceholder,
};
pub use ports::{
    CancellationToken, ModuleCompletion, OperationLoader, OperationTracker, ResponseSink,
    ScheduledTask, TaskHandle, TaskScheduler,
};
pub use publish_queue::{
    ActorQueues, OptimisticUpdate, PublishError, PublishQueue, PublishQueueProvider,
    SingleQueueProvider, StoreUpdater, UpdateId,
};
pub use record::{FieldValue, Record, RecordError};
pub use response::{
    format_path, PathSegment, ResponseChunk, ResponseData, ResponseError, TransportError,
};
pub use selection::{NormalizationNode, Selection, Selector, Variables};
pub use source::{RecordSource, RecordState, RecordStatus};
pub use store::{RetainHandle, Store, SubscriptionId};
