// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Task scheduler that holds work until the test releases it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use weft_core::{ScheduledTask, TaskHandle, TaskScheduler};

#[derive(Debug, Default)]
struct Queue {
    tasks: BTreeMap<TaskHandle, ScheduledTask>,
    next: u64,
    scheduled: usize,
    cancelled: Vec<TaskHandle>,
}

/// [`TaskScheduler`] fake: tasks run in scheduling order when
/// [`ManualScheduler::run_next`] or [`ManualScheduler::run_all`] is called.
///
/// Running a task only posts it to the execution's channel; the executor
/// still has to drain.
#[derive(Clone, Debug, Default)]
pub struct ManualScheduler {
    queue: Rc<RefCell<Queue>>,
}

impl ManualScheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks scheduled and neither run nor cancelled.
    pub fn pending(&self) -> usize {
        self.queue.borrow().tasks.len()
    }

    /// Total tasks ever scheduled.
    pub fn scheduled_count(&self) -> usize {
        self.queue.borrow().scheduled
    }

    /// Handles the executor cancelled.
    pub fn cancelled(&self) -> Vec<TaskHandle> {
        self.queue.borrow().cancelled.clone()
    }

    /// Releases the oldest pending task. Returns `false` if none was pending.
    pub fn run_next(&self) -> bool {
        let task = self.queue.borrow_mut().tasks.pop_first();
        match task {
            Some((_, task)) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Releases every pending task. Returns how many were released.
    pub fn run_all(&self) -> usize {
        let mut released = 0;
        while self.run_next() {
            released += 1;
        }
        released
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, task: ScheduledTask) -> TaskHandle {
        let mut queue = self.queue.borrow_mut();
        let handle = TaskHandle(queue.next);
        queue.next += 1;
        queue.scheduled += 1;
        queue.tasks.insert(handle, task);
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        let mut queue = self.queue.borrow_mut();
        queue.tasks.remove(&handle);
        queue.cancelled.push(handle);
    }
}
