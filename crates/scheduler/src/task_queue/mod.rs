//! Task queue handles.
//!
//! A [`TaskQueue`] is a cheap, cloneable handle onto queue state owned by the
//! [`TaskQueueManager`](crate::manager::TaskQueueManager). Once the queue is
//! unregistered, or the manager is dropped or shut down, every operation on
//! the handle degrades to a no-op.

pub mod task;
pub mod types;

use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub use task::{CancelableGroup, Task, TaskHandle, TaskInfo, TaskObserver};
pub use types::{PumpPolicy, QueueId, QueuePriority, TaskQueueSpec, WakeupPolicy};

use crate::error::SchedulerError;
use crate::manager::ManagerInner;
use crate::time::TimeTicks;
use crate::time_domain::TimeDomain;

#[derive(Clone)]
pub struct TaskQueue {
    pub(crate) id: QueueId,
    pub(crate) name: Arc<str>,
    pub(crate) manager: Weak<ManagerInner>,
}

impl TaskQueue {
    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Posting ─────────────────────────────────────────────────────

    /// Post a task. Returns `false` if the queue can no longer accept work.
    #[track_caller]
    pub fn post_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task), Duration::ZERO, true, None, Location::caller())
    }

    /// Post a task that becomes runnable once `delay` has elapsed in the
    /// queue's time domain.
    #[track_caller]
    pub fn post_delayed_task<F>(&self, task: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task), delay, true, None, Location::caller())
    }

    /// Post a task that must never run inside a nested run loop.
    #[track_caller]
    pub fn post_non_nestable_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task), Duration::ZERO, false, None, Location::caller())
    }

    #[track_caller]
    pub fn post_non_nestable_delayed_task<F>(&self, task: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task), delay, false, None, Location::caller())
    }

    /// Post a delayed task that can be cancelled through the returned handle.
    #[track_caller]
    pub fn post_cancelable_delayed_task<F>(&self, task: F, delay: Duration) -> Option<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TaskHandle::new();
        self.post(Box::new(task), delay, true, Some(handle.clone()), Location::caller())
            .then_some(handle)
    }

    /// Post a task tied to an existing handle, typically one taken from a
    /// [`CancelableGroup`].
    #[track_caller]
    pub fn post_task_with_handle<F>(&self, task: F, delay: Duration, handle: &TaskHandle) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(task), delay, true, Some(handle.clone()), Location::caller())
    }

    /// Post an already boxed task.
    #[track_caller]
    pub fn post_boxed(&self, task: Task, delay: Duration, nestable: bool) -> bool {
        self.post(task, delay, nestable, None, Location::caller())
    }

    /// Post on behalf of another caller, keeping their source location.
    pub(crate) fn post_from(
        &self,
        task: Task,
        nestable: bool,
        location: &'static Location<'static>,
    ) -> bool {
        self.post(task, Duration::ZERO, nestable, None, location)
    }

    fn post(
        &self,
        task: Task,
        delay: Duration,
        nestable: bool,
        handle: Option<TaskHandle>,
        location: &'static Location<'static>,
    ) -> bool {
        match self.manager.upgrade() {
            Some(inner) => inner.post_task(self.id, task, delay, nestable, handle, location),
            None => false,
        }
    }

    // ── Configuration ───────────────────────────────────────────────

    pub fn set_queue_enabled(&self, enabled: bool) {
        if let Some(inner) = self.manager.upgrade() {
            inner.set_queue_enabled(self.id, enabled);
        }
    }

    pub fn is_queue_enabled(&self) -> bool {
        self.manager
            .upgrade()
            .and_then(|inner| inner.is_queue_enabled(self.id))
            .unwrap_or(false)
    }

    pub fn set_queue_priority(&self, priority: QueuePriority) {
        if let Some(inner) = self.manager.upgrade() {
            inner.set_queue_priority(self.id, priority);
        }
    }

    pub fn queue_priority(&self) -> Option<QueuePriority> {
        self.manager.upgrade().and_then(|inner| inner.queue_priority(self.id))
    }

    pub fn set_pump_policy(&self, policy: PumpPolicy) {
        if let Some(inner) = self.manager.upgrade() {
            inner.set_pump_policy(self.id, policy);
        }
    }

    pub fn pump_policy(&self) -> Option<PumpPolicy> {
        self.manager.upgrade().and_then(|inner| inner.pump_policy(self.id))
    }

    /// Move the queue to another time domain. Pending delayed tasks keep their
    /// absolute run times and relative order.
    pub fn set_time_domain(&self, domain: Arc<dyn TimeDomain>) {
        if let Some(inner) = self.manager.upgrade() {
            inner.set_time_domain(self.id, domain);
        }
    }

    pub fn time_domain(&self) -> Option<Arc<dyn TimeDomain>> {
        self.manager.upgrade().and_then(|inner| inner.time_domain(self.id))
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// True if the queue has runnable work or work that a pump would make
    /// runnable right now.
    pub fn has_pending_immediate_work(&self) -> bool {
        self.manager
            .upgrade()
            .and_then(|inner| inner.has_pending_immediate_work(self.id))
            .unwrap_or(false)
    }

    /// True if incoming tasks, or delayed tasks that are already due, are
    /// waiting to be moved into the work queue.
    pub fn needs_pumping(&self) -> bool {
        self.manager
            .upgrade()
            .and_then(|inner| inner.needs_pumping(self.id))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.manager
            .upgrade()
            .and_then(|inner| inner.is_queue_empty(self.id))
            .unwrap_or(true)
    }

    /// Earliest run time of a non-cancelled delayed task on this queue.
    pub fn next_delayed_run_time(&self) -> Option<TimeTicks> {
        self.manager
            .upgrade()
            .and_then(|inner| inner.queue_next_delayed_run_time(self.id))
    }

    pub fn is_registered(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|inner| inner.is_registered(self.id))
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|inner| inner.runs_tasks_on_current_thread())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Move incoming tasks and due delayed tasks into the work queue.
    /// The only way work reaches a `Manual` queue.
    pub fn pump_queue(&self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.pump_queue(self.id);
        }
    }

    /// Remove the queue from its manager, dropping any tasks not yet started.
    pub fn unregister(&self) {
        if let Err(e) = self.try_unregister() {
            tracing::warn!(queue = %self.name, error = %e, "ignoring unregister");
        }
    }

    pub fn try_unregister(&self) -> Result<(), SchedulerError> {
        match self.manager.upgrade() {
            Some(inner) => inner.unregister_task_queue(self),
            None => Err(SchedulerError::Shutdown),
        }
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        if let Some(inner) = self.manager.upgrade() {
            inner.add_queue_task_observer(self.id, observer);
        }
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        if let Some(inner) = self.manager.upgrade() {
            inner.remove_queue_task_observer(self.id, observer);
        }
    }
}

impl PartialEq for TaskQueue {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.manager, &other.manager)
    }
}

impl Eq for TaskQueue {}

impl std::hash::Hash for TaskQueue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
