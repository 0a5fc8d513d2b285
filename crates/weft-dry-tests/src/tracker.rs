// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation tracker that records every call.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{OperationTracker, RequestDescriptor, RequestId};

#[derive(Debug, Default)]
struct Log {
    updates: Vec<(RequestId, Vec<RequestId>)>,
    completions: Vec<RequestId>,
}

/// [`OperationTracker`] fake; clones share one log.
#[derive(Clone, Debug, Default)]
pub struct RecordingTracker {
    log: Rc<RefCell<Log>>,
}

impl RecordingTracker {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(request, owners)` pairs passed to `update`, in order.
    pub fn updates(&self) -> Vec<(RequestId, Vec<RequestId>)> {
        self.log.borrow().updates.clone()
    }

    /// Requests passed to `complete`, in order.
    pub fn completions(&self) -> Vec<RequestId> {
        self.log.borrow().completions.clone()
    }
}

impl OperationTracker for RecordingTracker {
    fn update(&self, request: &RequestDescriptor, owners: &[RequestId]) {
        self.log
            .borrow_mut()
            .updates
            .push((request.identifier.clone(), owners.to_vec()));
    }

    fn complete(&self, request: &RequestDescriptor) {
        self.log
            .borrow_mut()
            .completions
            .push(request.identifier.clone());
    }
}
