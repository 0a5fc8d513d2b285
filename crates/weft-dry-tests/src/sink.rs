// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response sink that records every call.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{ExecutorError, ResponseChunk, ResponseSink};

/// One observed sink call.
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    /// `next(batch)`.
    Next(Vec<ResponseChunk>),
    /// `error(error)`.
    Error(ExecutorError),
    /// `complete()`.
    Complete,
}

/// [`ResponseSink`] fake; clones share one event log.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl RecordingSink {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    /// Batches delivered through `next`.
    pub fn batches(&self) -> Vec<Vec<ResponseChunk>> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Next(batch) => Some(batch.clone()),
                _ => None,
            })
            .collect()
    }

    /// Errors delivered through `error`.
    pub fn errors(&self) -> Vec<ExecutorError> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `complete` calls.
    pub fn complete_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Complete))
            .count()
    }

    /// Returns `true` once `error` or `complete` was called.
    pub fn is_terminated(&self) -> bool {
        self.events
            .borrow()
            .iter()
            .any(|e| matches!(e, SinkEvent::Error(_) | SinkEvent::Complete))
    }

    /// Drops the log.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl ResponseSink for RecordingSink {
    fn next(&self, batch: &[ResponseChunk]) {
        self.events.borrow_mut().push(SinkEvent::Next(batch.to_vec()));
    }

    fn error(&self, error: &ExecutorError) {
        self.events.borrow_mut().push(SinkEvent::Error(error.clone()));
    }

    fn complete(&self) {
        self.events.borrow_mut().push(SinkEvent::Complete);
    }
}
