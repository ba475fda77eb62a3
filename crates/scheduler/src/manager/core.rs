use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::panic::Location;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::error::SchedulerError;
use crate::task_queue::task::{DelayedTask, PendingTask};
use crate::task_queue::{
    PumpPolicy, QueueId, QueuePriority, Task, TaskHandle, TaskInfo, TaskObserver, TaskQueue,
    TaskQueueSpec, WakeupPolicy,
};
use crate::time::{TickClock, TimeTicks};
use crate::time_domain::{same_domain, RealTimeDomain, TimeDomain};

/// Take a mutex guard, recovering the data if a panicking task poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Diagnostics hooks for the manager. Called on the scheduler thread with no
/// manager lock held.
pub trait ManagerObserver: Send + Sync {
    /// Called just before `queue` is removed from the manager.
    fn on_unregister_task_queue(&self, _queue: &TaskQueue) {}

    /// A disabled queue that reports blocked execution holds the task that
    /// would otherwise have been selected.
    fn on_tried_to_execute_blocked_task(&self, _queue: &TaskQueue, _task: &TaskInfo) {}
}

pub(super) struct QueueState {
    pub(super) name: Arc<str>,
    pub(super) priority: QueuePriority,
    pub(super) enabled: bool,
    pub(super) pump_policy: PumpPolicy,
    pub(super) wakeup_policy: WakeupPolicy,
    pub(super) should_monitor_quiescence: bool,
    pub(super) should_notify_observers: bool,
    pub(super) should_report_when_execution_blocked: bool,
    pub(super) time_domain: Arc<dyn TimeDomain>,
    pub(super) incoming: VecDeque<PendingTask>,
    pub(super) delayed: BinaryHeap<DelayedTask>,
    pub(super) work: VecDeque<PendingTask>,
    pub(super) observers: Vec<Arc<dyn TaskObserver>>,
}

impl QueueState {
    pub(super) fn next_delayed_run_time(&self) -> Option<TimeTicks> {
        self.delayed
            .iter()
            .filter(|t| !t.0.is_cancelled())
            .map(DelayedTask::run_time)
            .min()
    }

    fn has_due_delayed_task(&self) -> bool {
        let now = self.time_domain.now();
        self.delayed
            .iter()
            .any(|t| !t.0.is_cancelled() && t.run_time() <= now)
    }

    pub(super) fn needs_pumping(&self) -> bool {
        !self.incoming.is_empty() || self.has_due_delayed_task()
    }

    pub(super) fn has_pending_immediate_work(&self) -> bool {
        !self.work.is_empty() || self.needs_pumping()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.incoming.is_empty()
            && self.work.is_empty()
            && self.delayed.iter().all(|t| t.0.is_cancelled())
    }

    /// Pop every delayed task that is due in this queue's time domain,
    /// discarding cancelled ones.
    pub(super) fn take_due_delayed(&mut self, graveyard: &mut Vec<PendingTask>) -> Vec<PendingTask> {
        let now = self.time_domain.now();
        let mut due = Vec::new();
        while self.delayed.peek().is_some_and(|t| t.run_time() <= now) {
            let Some(DelayedTask(task)) = self.delayed.pop() else {
                break;
            };
            if task.is_cancelled() {
                graveyard.push(task);
            } else {
                due.push(task);
            }
        }
        due
    }

    /// Append incoming tasks to the work queue and restore enqueue order.
    pub(super) fn move_incoming_to_work(&mut self) {
        self.work.extend(self.incoming.drain(..));
        self.work
            .make_contiguous()
            .sort_by_key(|t| t.enqueue_order);
    }

    /// Move due delayed tasks, then incoming tasks, into the work queue.
    /// Delayed tasks get a fresh enqueue order as they become runnable.
    pub(super) fn pump(&mut self, next_sequence_num: &mut u64, graveyard: &mut Vec<PendingTask>) {
        for mut task in self.take_due_delayed(graveyard) {
            task.enqueue_order = *next_sequence_num;
            *next_sequence_num += 1;
            self.work.push_back(task);
        }
        self.move_incoming_to_work();
    }

    pub(super) fn drain_all(&mut self, out: &mut Vec<PendingTask>) {
        out.extend(self.incoming.drain(..));
        out.extend(self.work.drain(..));
        out.extend(self.delayed.drain().map(|t| t.0));
    }
}

pub(super) struct ManagerState {
    pub(super) queues: BTreeMap<QueueId, QueueState>,
    pub(super) next_queue_id: u64,
    /// Shared by post-time sequence numbers and reload-time enqueue orders.
    pub(super) next_sequence_num: u64,
    pub(super) nesting_depth: usize,
    /// Stack of queues whose task is currently running (nested loops push).
    pub(super) executing: Vec<QueueId>,
    pub(super) deferred_non_nestable: VecDeque<(QueueId, PendingTask)>,
    pub(super) starvation_count: usize,
    pub(super) task_ran_on_monitored_queue: bool,
    pub(super) task_observers: Vec<Arc<dyn TaskObserver>>,
    pub(super) observer: Option<Arc<dyn ManagerObserver>>,
    pub(super) time_domains: Vec<Arc<dyn TimeDomain>>,
    pub(super) thread_id: ThreadId,
    /// Bumped whenever work may have become runnable; lets the blocking loop
    /// detect changes that raced with its last selection.
    pub(super) work_generation: u64,
    pub(super) shutdown: bool,
}

pub struct ManagerInner {
    pub(super) state: Mutex<ManagerState>,
    pub(super) wake: Condvar,
    pub(super) clock: Arc<dyn TickClock>,
    pub(super) real_time_domain: Arc<dyn TimeDomain>,
    pub(super) max_starvation_tasks: usize,
}

/// Multiplexes task queues onto one scheduler thread.
///
/// Cloning is cheap and every clone drives the same set of queues.
#[derive(Clone)]
pub struct TaskQueueManager {
    pub(super) inner: Arc<ManagerInner>,
}

enum PostNotify {
    Nothing,
    Immediate(Arc<dyn TimeDomain>),
    Delayed(Arc<dyn TimeDomain>, TimeTicks),
}

impl TaskQueueManager {
    /// Create a manager bound to the calling thread.
    pub fn new(clock: Arc<dyn TickClock>, config: &ManagerConfig) -> Self {
        let real_time_domain: Arc<dyn TimeDomain> =
            Arc::new(RealTimeDomain::new(Arc::clone(&clock)));
        let state = ManagerState {
            queues: BTreeMap::new(),
            next_queue_id: 1,
            next_sequence_num: 1,
            nesting_depth: 0,
            executing: Vec::new(),
            deferred_non_nestable: VecDeque::new(),
            starvation_count: 0,
            task_ran_on_monitored_queue: false,
            task_observers: Vec::new(),
            observer: None,
            time_domains: vec![Arc::clone(&real_time_domain)],
            thread_id: thread::current().id(),
            work_generation: 0,
            shutdown: false,
        };
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(state),
                wake: Condvar::new(),
                clock,
                real_time_domain,
                max_starvation_tasks: config.max_high_priority_starvation_tasks,
            }),
        }
    }

    /// Create and register a queue.
    pub fn new_task_queue(&self, spec: TaskQueueSpec) -> TaskQueue {
        let time_domain = spec
            .time_domain
            .unwrap_or_else(|| Arc::clone(&self.inner.real_time_domain));
        let name: Arc<str> = Arc::from(spec.name.as_str());
        let id = {
            let mut state = lock(&self.inner.state);
            let id = QueueId(state.next_queue_id);
            state.next_queue_id += 1;
            state.queues.insert(
                id,
                QueueState {
                    name: Arc::clone(&name),
                    priority: spec.priority,
                    enabled: true,
                    pump_policy: spec.pump_policy,
                    wakeup_policy: spec.wakeup_policy,
                    should_monitor_quiescence: spec.should_monitor_quiescence,
                    should_notify_observers: spec.should_notify_observers,
                    should_report_when_execution_blocked: spec
                        .should_report_when_execution_blocked,
                    time_domain,
                    incoming: VecDeque::new(),
                    delayed: BinaryHeap::new(),
                    work: VecDeque::new(),
                    observers: Vec::new(),
                },
            );
            id
        };
        info!(queue = %name, id = %id, priority = ?spec.priority, "task queue registered");
        TaskQueue {
            id,
            name,
            manager: Arc::downgrade(&self.inner),
        }
    }

    pub fn clock(&self) -> Arc<dyn TickClock> {
        Arc::clone(&self.inner.clock)
    }

    pub fn now(&self) -> TimeTicks {
        self.inner.clock.now_ticks()
    }

    pub fn real_time_domain(&self) -> Arc<dyn TimeDomain> {
        Arc::clone(&self.inner.real_time_domain)
    }

    /// Make a time domain visible to name lookups and, for virtual domains,
    /// to auto-advance.
    pub fn register_time_domain(&self, domain: Arc<dyn TimeDomain>) {
        let mut state = lock(&self.inner.state);
        if !state.time_domains.iter().any(|d| same_domain(d, &domain)) {
            debug!(domain = domain.name(), "time domain registered");
            state.time_domains.push(domain);
        }
    }

    pub fn unregister_time_domain(&self, domain: &Arc<dyn TimeDomain>) {
        lock(&self.inner.state)
            .time_domains
            .retain(|d| !same_domain(d, domain));
    }

    pub fn time_domain(&self, name: &str) -> Result<Arc<dyn TimeDomain>, SchedulerError> {
        lock(&self.inner.state)
            .time_domains
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| SchedulerError::TimeDomainNotRegistered(name.to_string()))
    }

    /// Earliest non-cancelled delayed run time among queues in `domain`.
    pub fn next_scheduled_run_time(&self, domain: &Arc<dyn TimeDomain>) -> Option<TimeTicks> {
        lock(&self.inner.state)
            .queues
            .values()
            .filter(|q| same_domain(&q.time_domain, domain))
            .filter_map(QueueState::next_delayed_run_time)
            .min()
    }

    pub fn set_observer(&self, observer: Arc<dyn ManagerObserver>) {
        lock(&self.inner.state).observer = Some(observer);
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        lock(&self.inner.state).task_observers.push(observer);
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        lock(&self.inner.state)
            .task_observers
            .retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(observer)));
    }

    /// True iff no task from a quiescence-monitored queue ran since the
    /// previous call.
    pub fn get_and_clear_system_is_quiescent_bit(&self) -> bool {
        let mut state = lock(&self.inner.state);
        let task_ran = std::mem::take(&mut state.task_ran_on_monitored_queue);
        !task_ran
    }

    /// The queue whose task is running right now, if any.
    pub fn currently_executing_queue(&self) -> Option<TaskQueue> {
        let state = lock(&self.inner.state);
        let id = *state.executing.last()?;
        let queue = state.queues.get(&id)?;
        Some(TaskQueue {
            id,
            name: Arc::clone(&queue.name),
            manager: Arc::downgrade(&self.inner),
        })
    }

    pub fn nesting_depth(&self) -> usize {
        lock(&self.inner.state).nesting_depth
    }

    pub fn is_nested(&self) -> bool {
        self.nesting_depth() > 0
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.inner.runs_tasks_on_current_thread()
    }

    /// Rebind the manager to the calling thread, e.g. when handing it to a
    /// dedicated scheduler thread before calling [`run`](Self::run).
    pub fn bind_to_current_thread(&self) {
        lock(&self.inner.state).thread_id = thread::current().id();
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.inner.state).queues.len()
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.inner.state).shutdown
    }

    /// Stop accepting work and drop every pending task.
    pub fn shutdown(&self) {
        let mut dropped = Vec::new();
        {
            let mut state = lock(&self.inner.state);
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            for queue in state.queues.values_mut() {
                queue.drain_all(&mut dropped);
            }
            dropped.extend(state.deferred_non_nestable.drain(..).map(|(_, t)| t));
        }
        self.inner.wake.notify_all();
        info!(dropped_tasks = dropped.len(), "task queue manager shut down");
    }

    pub(super) fn handle_for(&self, id: QueueId, name: Arc<str>) -> TaskQueue {
        TaskQueue {
            id,
            name,
            manager: Arc::downgrade(&self.inner),
        }
    }
}

impl ManagerInner {
    fn signal_work(&self) {
        lock(&self.state).work_generation += 1;
        self.wake.notify_all();
    }

    fn with_queue<R>(&self, id: QueueId, f: impl FnOnce(&mut QueueState) -> R) -> Option<R> {
        let mut state = lock(&self.state);
        state.queues.get_mut(&id).map(f)
    }

    pub(crate) fn runs_tasks_on_current_thread(&self) -> bool {
        lock(&self.state).thread_id == thread::current().id()
    }

    pub(crate) fn post_task(
        &self,
        id: QueueId,
        task: Task,
        delay: Duration,
        nestable: bool,
        handle: Option<TaskHandle>,
        location: &'static Location<'static>,
    ) -> bool {
        let outcome = {
            let mut state = lock(&self.state);
            if state.shutdown {
                Err(task)
            } else {
                let sequence_num = state.next_sequence_num;
                match state.queues.get_mut(&id) {
                    None => Err(task),
                    Some(queue) => {
                        let mut pending = PendingTask {
                            task,
                            posted_from: location,
                            sequence_num,
                            enqueue_order: sequence_num,
                            delayed_run_time: None,
                            nestable,
                            handle,
                        };
                        let notify = if delay.is_zero() {
                            let was_empty = queue.incoming.is_empty();
                            queue.incoming.push_back(pending);
                            if was_empty {
                                PostNotify::Immediate(Arc::clone(&queue.time_domain))
                            } else {
                                PostNotify::Nothing
                            }
                        } else {
                            let run_time = queue.time_domain.now() + delay;
                            let previous = queue.next_delayed_run_time();
                            pending.delayed_run_time = Some(run_time);
                            queue.delayed.push(DelayedTask(pending));
                            if previous.map_or(true, |p| run_time < p) {
                                PostNotify::Delayed(Arc::clone(&queue.time_domain), run_time)
                            } else {
                                PostNotify::Nothing
                            }
                        };
                        state.next_sequence_num += 1;
                        state.work_generation += 1;
                        Ok(notify)
                    }
                }
            }
        };

        match outcome {
            Err(rejected) => {
                drop(rejected);
                false
            }
            Ok(notify) => {
                self.wake.notify_all();
                match notify {
                    PostNotify::Nothing => {}
                    PostNotify::Immediate(domain) => domain.on_queue_has_immediate_work(id),
                    PostNotify::Delayed(domain, run_time) => {
                        domain.on_queue_has_delayed_work(id, run_time)
                    }
                }
                true
            }
        }
    }

    pub(crate) fn set_queue_enabled(&self, id: QueueId, enabled: bool) {
        let changed = self.with_queue(id, |q| {
            let changed = q.enabled != enabled;
            q.enabled = enabled;
            changed.then(|| Arc::clone(&q.name))
        });
        if let Some(Some(name)) = changed {
            debug!(queue = %name, enabled, "queue enablement changed");
            self.signal_work();
        }
    }

    pub(crate) fn is_queue_enabled(&self, id: QueueId) -> Option<bool> {
        self.with_queue(id, |q| q.enabled)
    }

    pub(crate) fn set_queue_priority(&self, id: QueueId, priority: QueuePriority) {
        self.with_queue(id, |q| q.priority = priority);
    }

    pub(crate) fn queue_priority(&self, id: QueueId) -> Option<QueuePriority> {
        self.with_queue(id, |q| q.priority)
    }

    pub(crate) fn set_pump_policy(&self, id: QueueId, policy: PumpPolicy) {
        self.with_queue(id, |q| q.pump_policy = policy);
    }

    pub(crate) fn pump_policy(&self, id: QueueId) -> Option<PumpPolicy> {
        self.with_queue(id, |q| q.pump_policy)
    }

    pub(crate) fn set_time_domain(&self, id: QueueId, domain: Arc<dyn TimeDomain>) {
        let earliest = self
            .with_queue(id, |q| {
                if same_domain(&q.time_domain, &domain) {
                    return None;
                }
                debug!(queue = %q.name, domain = domain.name(), "queue moved to time domain");
                q.time_domain = Arc::clone(&domain);
                q.next_delayed_run_time()
            })
            .flatten();
        if let Some(run_time) = earliest {
            domain.on_queue_has_delayed_work(id, run_time);
        }
    }

    pub(crate) fn time_domain(&self, id: QueueId) -> Option<Arc<dyn TimeDomain>> {
        self.with_queue(id, |q| Arc::clone(&q.time_domain))
    }

    pub(crate) fn has_pending_immediate_work(&self, id: QueueId) -> Option<bool> {
        self.with_queue(id, |q| q.has_pending_immediate_work())
    }

    pub(crate) fn needs_pumping(&self, id: QueueId) -> Option<bool> {
        self.with_queue(id, |q| q.needs_pumping())
    }

    pub(crate) fn is_queue_empty(&self, id: QueueId) -> Option<bool> {
        self.with_queue(id, |q| q.is_empty())
    }

    pub(crate) fn queue_next_delayed_run_time(&self, id: QueueId) -> Option<TimeTicks> {
        self.with_queue(id, |q| q.next_delayed_run_time()).flatten()
    }

    pub(crate) fn is_registered(&self, id: QueueId) -> bool {
        lock(&self.state).queues.contains_key(&id)
    }

    pub(crate) fn pump_queue(&self, id: QueueId) {
        let mut graveyard = Vec::new();
        {
            let mut state = lock(&self.state);
            let state = &mut *state;
            if let Some(queue) = state.queues.get_mut(&id) {
                queue.pump(&mut state.next_sequence_num, &mut graveyard);
            }
        }
        self.signal_work();
    }

    pub(crate) fn unregister_task_queue(&self, queue: &TaskQueue) -> Result<(), SchedulerError> {
        let observer = {
            let state = lock(&self.state);
            if !state.queues.contains_key(&queue.id) {
                return Err(SchedulerError::QueueNotRegistered(queue.name.to_string()));
            }
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_unregister_task_queue(queue);
        }

        let mut dropped = Vec::new();
        {
            let mut state = lock(&self.state);
            if let Some(mut removed) = state.queues.remove(&queue.id) {
                removed.drain_all(&mut dropped);
            }
            let deferred = std::mem::take(&mut state.deferred_non_nestable);
            for (id, task) in deferred {
                if id == queue.id {
                    dropped.push(task);
                } else {
                    state.deferred_non_nestable.push_back((id, task));
                }
            }
        }
        info!(queue = %queue.name, dropped_tasks = dropped.len(), "task queue unregistered");
        Ok(())
    }

    pub(crate) fn add_queue_task_observer(&self, id: QueueId, observer: Arc<dyn TaskObserver>) {
        self.with_queue(id, |q| q.observers.push(observer));
    }

    pub(crate) fn remove_queue_task_observer(&self, id: QueueId, observer: &Arc<dyn TaskObserver>) {
        self.with_queue(id, |q| {
            q.observers
                .retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(observer)))
        });
    }
}
