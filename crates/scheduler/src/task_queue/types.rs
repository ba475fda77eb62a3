use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::time_domain::TimeDomain;

/// Queue priority. Lower variants are serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum QueuePriority {
    /// Scheduler bookkeeping; always runs before anything else.
    Control = 0,
    /// Latency sensitive work such as compositor input.
    High = 1,
    /// The default for most queues.
    Normal = 2,
    Low = 3,
    /// Only runs when nothing else is runnable.
    BestEffort = 4,
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Normal
    }
}

/// When a queue's posted tasks become eligible for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumpPolicy {
    /// Incoming and due delayed tasks are picked up on every manager turn.
    Auto,
    /// Like `Auto`, but only after a newer task from a queue that may wake
    /// others has run.
    AfterWakeup,
    /// Tasks only move when [`TaskQueue::pump_queue`] is called.
    ///
    /// [`TaskQueue::pump_queue`]: crate::task_queue::TaskQueue::pump_queue
    Manual,
}

impl Default for PumpPolicy {
    fn default() -> Self {
        PumpPolicy::Auto
    }
}

/// Whether running a task from this queue counts as a wake-up for
/// `AfterWakeup` queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WakeupPolicy {
    CanWakeOtherQueues,
    DontWakeOtherQueues,
}

impl Default for WakeupPolicy {
    fn default() -> Self {
        WakeupPolicy::CanWakeOtherQueues
    }
}

/// Manager-unique queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub(crate) u64);

impl QueueId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tq#{}", self.0)
    }
}

/// Construction-time description of a task queue.
#[derive(Clone)]
pub struct TaskQueueSpec {
    pub name: String,
    pub priority: QueuePriority,
    pub pump_policy: PumpPolicy,
    pub wakeup_policy: WakeupPolicy,
    /// Running a task on this queue clears the manager's quiescence bit.
    pub should_monitor_quiescence: bool,
    /// Manager-wide task observers see this queue's tasks.
    pub should_notify_observers: bool,
    /// Report to the manager observer when a task is held back because the
    /// queue is disabled.
    pub should_report_when_execution_blocked: bool,
    /// Defaults to the manager's real time domain.
    pub time_domain: Option<Arc<dyn TimeDomain>>,
}

impl TaskQueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: QueuePriority::Normal,
            pump_policy: PumpPolicy::Auto,
            wakeup_policy: WakeupPolicy::CanWakeOtherQueues,
            should_monitor_quiescence: false,
            should_notify_observers: true,
            should_report_when_execution_blocked: false,
            time_domain: None,
        }
    }

    pub fn priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn pump_policy(mut self, policy: PumpPolicy) -> Self {
        self.pump_policy = policy;
        self
    }

    pub fn wakeup_policy(mut self, policy: WakeupPolicy) -> Self {
        self.wakeup_policy = policy;
        self
    }

    pub fn should_monitor_quiescence(mut self, monitor: bool) -> Self {
        self.should_monitor_quiescence = monitor;
        self
    }

    pub fn should_notify_observers(mut self, notify: bool) -> Self {
        self.should_notify_observers = notify;
        self
    }

    pub fn should_report_when_execution_blocked(mut self, report: bool) -> Self {
        self.should_report_when_execution_blocked = report;
        self
    }

    pub fn time_domain(mut self, domain: Arc<dyn TimeDomain>) -> Self {
        self.time_domain = Some(domain);
        self
    }
}

impl fmt::Debug for TaskQueueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueueSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("pump_policy", &self.pump_policy)
            .field("wakeup_policy", &self.wakeup_policy)
            .field("should_monitor_quiescence", &self.should_monitor_quiescence)
            .field("should_notify_observers", &self.should_notify_observers)
            .field(
                "should_report_when_execution_blocked",
                &self.should_report_when_execution_blocked,
            )
            .field("time_domain", &self.time_domain.as_ref().map(|d| d.name().to_string()))
            .finish()
    }
}
