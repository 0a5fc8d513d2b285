// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared map of which executions still have work outstanding.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::operation::RequestId;

/// Whether an execution may still mutate the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    /// More chunks or module loads are expected.
    Active,
    /// Nothing further is expected, but the execution is still open.
    Inactive,
}

/// Request id → activity, shared by every executor of one environment.
///
/// An entry exists from an execution's start until it completes or is
/// cancelled. Collection of unreferenced records is only safe while no entry
/// is [`Activity::Active`].
#[derive(Clone, Debug, Default)]
pub struct ExecutionRegistry {
    entries: Rc<RefCell<BTreeMap<RequestId, Activity>>>,
}

impl ExecutionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `request`'s current activity.
    pub fn set(&self, request: &RequestId, activity: Activity) {
        self.entries.borrow_mut().insert(request.clone(), activity);
    }

    /// Drops `request`'s entry.
    pub fn remove(&self, request: &RequestId) {
        self.entries.borrow_mut().remove(request);
    }

    /// Current activity of `request`, if it is running.
    #[must_use]
    pub fn get(&self, request: &RequestId) -> Option<Activity> {
        self.entries.borrow().get(request).copied()
    }

    /// Returns `true` if any execution is active.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.entries
            .borrow()
            .values()
            .any(|a| *a == Activity::Active)
    }

    /// Number of open executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` when no execution is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
