// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for weft crates.
#![forbid(unsafe_code)]
//!
//! This crate provides commonly used test utilities to reduce duplication
//! across the weft test suite and improve test maintainability.
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`environment`] - Store + publish queue + executor wiring
//! - [`handler`] - Handle-field handler that copies a field under its handle key
//! - [`loader`] - Operation loader with synchronous and manually resolved modules
//! - [`scheduler`] - Task scheduler that runs work only when asked
//! - [`selections`] - Selection-tree and operation builders
//! - [`sink`] - Response sink recording every call
//! - [`tracker`] - Operation tracker recording every call

pub mod config;
pub mod environment;
pub mod handler;
pub mod loader;
pub mod scheduler;
pub mod selections;
pub mod sink;
pub mod tracker;

// Re-export commonly used items at crate root for convenience
pub use config::InMemoryConfigStore;
pub use environment::{EnvironmentBuilder, TestEnvironment};
pub use handler::CopyFieldHandler;
pub use loader::InMemoryOperationLoader;
pub use scheduler::ManualScheduler;
pub use selections::{
    actor_change, defer, defer_if, handle, module_import, operation, query, split_operation, stream,
    subscription, LinkedFieldBuilder,
};
pub use sink::{RecordingSink, SinkEvent};
pub use tracker::RecordingTracker;
