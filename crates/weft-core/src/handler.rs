// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handle-field handlers: materialize derived fields after a commit.
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::mutator::RecordSourceProxy;
use crate::payload::HandleFieldPayload;
use crate::publish_queue::PublishError;

/// Computes the derived value for one handle payload.
pub trait HandleFieldHandler {
    /// Reads `payload.field_key` and writes `payload.handle_key` through `proxy`.
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), PublishError>;
}

/// Looks up handlers by handle name.
pub trait HandlerProvider {
    /// Handler registered for `handle`, if any.
    fn handler(&self, handle: &str) -> Option<Rc<dyn HandleFieldHandler>>;
}

/// Name-keyed handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Rc<dyn HandleFieldHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `handle`, replacing any previous one.
    pub fn register(&mut self, handle: impl Into<String>, handler: Rc<dyn HandleFieldHandler>) {
        self.handlers.insert(handle.into(), handler);
    }

    /// Builder-style [`HandlerRegistry::register`].
    #[must_use]
    pub fn with(mut self, handle: impl Into<String>, handler: Rc<dyn HandleFieldHandler>) -> Self {
        self.register(handle, handler);
        self
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl HandlerProvider for HandlerRegistry {
    fn handler(&self, handle: &str) -> Option<Rc<dyn HandleFieldHandler>> {
        self.handlers.get(handle).cloned()
    }
}
