//! Runs a callback at the earliest of a series of requested deadlines.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::trace;

use crate::manager::lock;
use crate::task_queue::{TaskHandle, TaskQueue};
use crate::time::TimeTicks;

struct Pending {
    deadline: Option<TimeTicks>,
    handle: Option<TaskHandle>,
}

struct DeadlineState {
    queue: TaskQueue,
    callback: Arc<dyn Fn() + Send + Sync>,
    pending: Mutex<Pending>,
}

/// Posts `callback` to `queue` at the earliest deadline requested since it
/// last ran. Later deadlines are ignored while an earlier one is pending;
/// an earlier one replaces the pending post.
pub struct DeadlineTaskRunner {
    state: Arc<DeadlineState>,
}

impl DeadlineTaskRunner {
    pub fn new(queue: TaskQueue, callback: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            state: Arc::new(DeadlineState {
                queue,
                callback,
                pending: Mutex::new(Pending {
                    deadline: None,
                    handle: None,
                }),
            }),
        }
    }

    /// Request the callback to run `delay` after `now`.
    pub fn set_deadline(&self, delay: Duration, now: TimeTicks) {
        let deadline = now + delay;
        let handle = {
            let mut pending = lock(&self.state.pending);
            if pending.deadline.is_some_and(|current| deadline >= current) {
                return;
            }
            if let Some(previous) = pending.handle.take() {
                previous.cancel();
            }
            let handle = TaskHandle::new();
            pending.deadline = Some(deadline);
            pending.handle = Some(handle.clone());
            handle
        };

        trace!(queue = self.state.queue.name(), deadline = %deadline, "deadline set");
        let weak = Arc::downgrade(&self.state);
        self.state
            .queue
            .post_task_with_handle(move || run_deadline(&weak), delay, &handle);
    }

    pub fn has_pending_deadline(&self) -> bool {
        lock(&self.state.pending).deadline.is_some()
    }
}

fn run_deadline(state: &Weak<DeadlineState>) {
    let Some(state) = state.upgrade() else {
        return;
    };
    {
        let mut pending = lock(&state.pending);
        pending.deadline = None;
        pending.handle = None;
    }
    (state.callback)();
}
