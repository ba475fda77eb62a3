use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::core::{lock, ManagerObserver, ManagerState, TaskQueueManager};
use super::selection::PreviousTask;
use crate::task_queue::task::PendingTask;
use crate::task_queue::{QueueId, TaskInfo, TaskObserver, WakeupPolicy};
use crate::time::{SimulatedClock, TimeTicks};
use crate::time_domain::same_domain;

/// Upper bound on clock jumps in [`TaskQueueManager::run_until_idle_with_auto_advance`].
const MAX_AUTO_ADVANCE_STEPS: usize = 100_000;

struct SelectedTask {
    queue_id: QueueId,
    queue_name: Arc<str>,
    wakeup_policy: WakeupPolicy,
    observers: Vec<Arc<dyn TaskObserver>>,
    task: PendingTask,
}

struct NextTask {
    task: Option<SelectedTask>,
    blocked: Option<(QueueId, TaskInfo)>,
    observer: Option<Arc<dyn ManagerObserver>>,
}

impl ManagerState {
    fn selected(&self, queue_id: QueueId, task: PendingTask) -> Option<SelectedTask> {
        let queue = self.queues.get(&queue_id)?;
        let mut observers = Vec::new();
        if queue.should_notify_observers {
            observers.extend(self.task_observers.iter().cloned());
        }
        observers.extend(queue.observers.iter().cloned());
        Some(SelectedTask {
            queue_id,
            queue_name: Arc::clone(&queue.name),
            wakeup_policy: queue.wakeup_policy,
            observers,
            task,
        })
    }

    fn take_next_task(
        &mut self,
        max_starvation_tasks: usize,
        graveyard: &mut Vec<PendingTask>,
    ) -> NextTask {
        let observer = self.observer.clone();

        if self.nesting_depth == 0 {
            while let Some((queue_id, task)) = self.deferred_non_nestable.pop_front() {
                if self.queues.contains_key(&queue_id) && !task.is_cancelled() {
                    return NextTask {
                        task: self.selected(queue_id, task),
                        blocked: None,
                        observer,
                    };
                }
                graveyard.push(task);
            }
        }

        self.reload_queues(None, graveyard);
        let mut blocked = None;
        loop {
            let selection = self.select(max_starvation_tasks, graveyard);
            if blocked.is_none() {
                blocked = selection.blocked;
            }
            let Some(queue_id) = selection.chosen else {
                return NextTask {
                    task: None,
                    blocked,
                    observer,
                };
            };
            let Some(queue) = self.queues.get_mut(&queue_id) else {
                continue;
            };
            let Some(task) = queue.work.pop_front() else {
                continue;
            };
            if !task.nestable && self.nesting_depth > 0 {
                debug!(queue = %queue.name, seq = task.sequence_num, "deferring non-nestable task");
                self.deferred_non_nestable.push_back((queue_id, task));
                continue;
            }
            if queue.should_monitor_quiescence {
                self.task_ran_on_monitored_queue = true;
            }
            return NextTask {
                task: self.selected(queue_id, task),
                blocked,
                observer,
            };
        }
    }
}

impl TaskQueueManager {
    /// Run the next runnable task, if any. Returns `false` when nothing ran.
    pub fn run_one_task(&self) -> bool {
        let mut graveyard = Vec::new();
        let next = {
            let mut state = lock(&self.inner.state);
            if state.shutdown {
                return false;
            }
            state.take_next_task(self.inner.max_starvation_tasks, &mut graveyard)
        };
        drop(graveyard);

        if let (Some(observer), Some((queue_id, info))) = (next.observer, next.blocked) {
            let queue = self.handle_for(queue_id, Arc::clone(&info.queue_name));
            observer.on_tried_to_execute_blocked_task(&queue, &info);
        }

        match next.task {
            Some(selected) => {
                self.execute(selected);
                true
            }
            None => false,
        }
    }

    fn execute(&self, selected: SelectedTask) {
        let SelectedTask {
            queue_id,
            queue_name,
            wakeup_policy,
            observers,
            task,
        } = selected;
        let info = task.info(queue_id, &queue_name);

        for observer in &observers {
            observer.will_process_task(&info);
        }
        lock(&self.inner.state).executing.push(queue_id);

        debug!(queue = %queue_name, seq = info.sequence_num, from = %info.posted_from, "running task");
        (task.task)();

        lock(&self.inner.state).executing.pop();
        for observer in &observers {
            observer.did_process_task(&info);
        }

        let mut graveyard = Vec::new();
        {
            let mut state = lock(&self.inner.state);
            if state.nesting_depth == 0 && !state.shutdown {
                state.reload_queues(
                    Some(PreviousTask {
                        enqueue_order: info.enqueue_order,
                        wakeup_policy,
                    }),
                    &mut graveyard,
                );
            }
        }
    }

    /// Run tasks until nothing is runnable. Virtual time domains with
    /// auto-advance on jump to their next delayed task in between.
    pub fn run_until_idle(&self) {
        loop {
            while self.run_one_task() {}
            if !self.auto_advance_virtual_time() {
                break;
            }
        }
    }

    /// Run a nested loop until idle. Non-nestable tasks selected inside are
    /// deferred until the outermost loop resumes.
    pub fn run_nested_until_idle(&self) {
        lock(&self.inner.state).nesting_depth += 1;
        while self.run_one_task() {}
        let mut state = lock(&self.inner.state);
        state.nesting_depth = state.nesting_depth.saturating_sub(1);
    }

    fn auto_advance_virtual_time(&self) -> bool {
        let domains: Vec<_> = lock(&self.inner.state)
            .time_domains
            .iter()
            .filter(|d| d.as_virtual().is_some_and(|v| v.auto_advance()))
            .cloned()
            .collect();

        let mut advanced = false;
        for domain in domains {
            let now = domain.now();
            let next = self.next_scheduled_run_time(&domain);
            if let (Some(target), Some(virtual_domain)) = (next, domain.as_virtual()) {
                if target > now {
                    virtual_domain.advance_to(target);
                    advanced = true;
                }
            }
        }
        advanced
    }

    /// The earliest future run time of a delayed task on a real-time queue.
    /// This is when the run loop next needs to wake up.
    pub fn next_wake_up(&self) -> Option<TimeTicks> {
        let now = self.now();
        let state = lock(&self.inner.state);
        if state.shutdown {
            return None;
        }
        state
            .queues
            .values()
            .filter(|q| same_domain(&q.time_domain, &self.inner.real_time_domain))
            .filter_map(|q| q.next_delayed_run_time())
            .filter(|t| *t > now)
            .min()
    }

    /// Run everything due within `period`, advancing `clock` from wake-up to
    /// wake-up, and leave the clock at the end of the period.
    pub fn run_for_period(&self, clock: &SimulatedClock, period: Duration) {
        let end = clock.now() + period;
        loop {
            self.run_until_idle();
            match self.next_wake_up() {
                Some(wake_up) if wake_up <= end => clock.advance_to(wake_up),
                _ => break,
            }
        }
        clock.advance_to(end);
    }

    /// Run until idle, jumping `clock` to each successive wake-up. Returns
    /// `false` if work was still scheduled after the step limit.
    pub fn run_until_idle_with_auto_advance(&self, clock: &SimulatedClock) -> bool {
        for _ in 0..MAX_AUTO_ADVANCE_STEPS {
            self.run_until_idle();
            match self.next_wake_up() {
                Some(wake_up) => clock.advance_to(wake_up),
                None => return true,
            }
        }
        warn!(steps = MAX_AUTO_ADVANCE_STEPS, "auto-advance did not reach idle");
        false
    }

    /// Blocking run loop for production use. Sleeps on a condition variable
    /// until a post arrives or the next delayed task is due, and returns after
    /// [`shutdown`](Self::shutdown). Must be paired with a wall clock.
    pub fn run(&self) {
        self.bind_to_current_thread();
        debug!("task queue manager run loop started");
        loop {
            let seen_generation = {
                let state = lock(&self.inner.state);
                if state.shutdown {
                    break;
                }
                state.work_generation
            };
            if self.run_one_task() {
                continue;
            }

            let wake_up = self.next_wake_up();
            let now = self.now();
            let state = lock(&self.inner.state);
            if state.shutdown {
                break;
            }
            if state.work_generation != seen_generation {
                continue;
            }
            match wake_up {
                Some(at) => {
                    let timeout = at.saturating_duration_since(now);
                    drop(
                        self.inner
                            .wake
                            .wait_timeout(state, timeout)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
                None => {
                    drop(self.inner.wake.wait(state).unwrap_or_else(PoisonError::into_inner));
                }
            }
        }
        debug!("task queue manager run loop exited");
    }
}
