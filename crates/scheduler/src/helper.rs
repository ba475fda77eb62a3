//! Shared plumbing for the renderer and worker schedulers.
//!
//! A [`SchedulerHelper`] owns the task queue manager and the three queues
//! every scheduler needs: the default queue, a control queue for scheduler
//! bookkeeping, and a control queue that only runs after some other task has
//! woken the thread.

use std::sync::Arc;

use tracing::info;

use crate::config::ManagerConfig;
use crate::manager::{ManagerObserver, TaskQueueManager};
use crate::task_queue::{
    PumpPolicy, QueuePriority, TaskObserver, TaskQueue, TaskQueueSpec, WakeupPolicy,
};
use crate::time::{TickClock, TimeTicks};
use crate::time_domain::TimeDomain;

#[derive(Clone)]
pub struct SchedulerHelper {
    manager: TaskQueueManager,
    default_tq: TaskQueue,
    control_tq: TaskQueue,
    control_after_wakeup_tq: TaskQueue,
}

impl SchedulerHelper {
    /// Build a manager on `clock` and register the standard queues. Queue
    /// names are prefixed with `name`.
    pub fn new(clock: Arc<dyn TickClock>, config: &ManagerConfig, name: &str) -> Self {
        let manager = TaskQueueManager::new(clock, config);

        let default_tq = manager.new_task_queue(
            TaskQueueSpec::new(format!("{name}.default_tq")).should_monitor_quiescence(true),
        );
        let control_tq = manager.new_task_queue(
            TaskQueueSpec::new(format!("{name}.control_tq"))
                .priority(QueuePriority::Control)
                .should_notify_observers(false),
        );
        let control_after_wakeup_tq = manager.new_task_queue(
            TaskQueueSpec::new(format!("{name}.control_after_wakeup_tq"))
                .priority(QueuePriority::Control)
                .pump_policy(PumpPolicy::AfterWakeup)
                .wakeup_policy(WakeupPolicy::DontWakeOtherQueues)
                .should_notify_observers(false),
        );

        info!(helper = name, "scheduler helper initialized");
        Self {
            manager,
            default_tq,
            control_tq,
            control_after_wakeup_tq,
        }
    }

    pub fn manager(&self) -> &TaskQueueManager {
        &self.manager
    }

    pub fn new_task_queue(&self, spec: TaskQueueSpec) -> TaskQueue {
        self.manager.new_task_queue(spec)
    }

    pub fn default_task_queue(&self) -> &TaskQueue {
        &self.default_tq
    }

    pub fn control_task_queue(&self) -> &TaskQueue {
        &self.control_tq
    }

    pub fn control_after_wakeup_task_queue(&self) -> &TaskQueue {
        &self.control_after_wakeup_tq
    }

    pub fn real_time_domain(&self) -> Arc<dyn TimeDomain> {
        self.manager.real_time_domain()
    }

    pub fn register_time_domain(&self, domain: Arc<dyn TimeDomain>) {
        self.manager.register_time_domain(domain);
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.manager.add_task_observer(observer);
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.manager.remove_task_observer(observer);
    }

    pub fn set_observer(&self, observer: Arc<dyn ManagerObserver>) {
        self.manager.set_observer(observer);
    }

    pub fn get_and_clear_system_is_quiescent_bit(&self) -> bool {
        self.manager.get_and_clear_system_is_quiescent_bit()
    }

    pub fn now(&self) -> TimeTicks {
        self.manager.now()
    }

    pub fn clock(&self) -> Arc<dyn TickClock> {
        self.manager.clock()
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.manager.runs_tasks_on_current_thread()
    }

    pub fn is_shutdown(&self) -> bool {
        self.manager.is_shutdown()
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}
