use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::idle_task_runner::{IdleTaskRunner, IdleTaskRunnerDelegate};
use crate::config::IdleConfig;
use crate::helper::SchedulerHelper;
use crate::manager::lock;
use crate::task_queue::{
    CancelableGroup, PumpPolicy, QueuePriority, TaskInfo, TaskObserver, TaskQueue, TaskQueueSpec,
};
use crate::time::{duration_micros, TimeTicks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePeriodState {
    NotInIdlePeriod,
    InShortIdlePeriod,
    InLongIdlePeriod,
    /// A long idle period whose deadline was not cut short by a pending
    /// delayed task.
    InLongIdlePeriodWithMaxDeadline,
    /// A long idle period with no idle work; resumes on the next post.
    InLongIdlePeriodPaused,
}

impl IdlePeriodState {
    pub fn is_in_idle_period(self) -> bool {
        self != IdlePeriodState::NotInIdlePeriod
    }

    pub fn is_in_long_idle_period(self) -> bool {
        matches!(
            self,
            IdlePeriodState::InLongIdlePeriod
                | IdlePeriodState::InLongIdlePeriodWithMaxDeadline
                | IdlePeriodState::InLongIdlePeriodPaused
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdlePeriodState::NotInIdlePeriod => "not_in_idle_period",
            IdlePeriodState::InShortIdlePeriod => "in_short_idle_period",
            IdlePeriodState::InLongIdlePeriod => "in_long_idle_period",
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline => {
                "in_long_idle_period_with_max_deadline"
            }
            IdlePeriodState::InLongIdlePeriodPaused => "in_long_idle_period_paused",
        }
    }
}

/// Answer to [`IdleHelperDelegate::can_enter_long_idle_period`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongIdleDecision {
    Allowed,
    /// Not now; ask again after the given delay.
    RetryAfter(Duration),
}

/// The scheduler that owns an [`IdleHelper`]. All calls happen on the
/// scheduler thread.
pub trait IdleHelperDelegate: Send + Sync {
    fn can_enter_long_idle_period(&self, now: TimeTicks) -> LongIdleDecision;

    /// Called each time a long idle period is postponed because non-idle
    /// tasks ran during the quiescence window.
    fn is_not_quiescent(&self);

    fn on_idle_period_started(&self);

    fn on_idle_period_ended(&self);
}

struct IdleState {
    period: IdlePeriodState,
    deadline: TimeTicks,
}

/// Opens and closes idle periods and keeps long idle periods repeating
/// while idle work remains.
///
/// Idle tasks live on a manual-pump, best-effort queue. Starting a period
/// enables and pumps that queue; ending it disables the queue, so tasks
/// posted during a period run in the next one.
pub struct IdleHelper {
    name: String,
    helper: SchedulerHelper,
    delegate: Weak<dyn IdleHelperDelegate>,
    idle_queue: TaskQueue,
    idle_task_runner: Arc<IdleTaskRunner>,
    maximum_idle_period: Duration,
    minimum_idle_period: Duration,
    retry_enable_long_idle_period_delay: Duration,
    required_quiescence: Duration,
    state: Mutex<IdleState>,
    enable_next_long_idle_period: CancelableGroup,
    on_idle_task_posted: CancelableGroup,
    shutdown: AtomicBool,
    weak_self: Weak<IdleHelper>,
}

impl IdleHelper {
    /// Create the idle queue on `helper` and register for task callbacks.
    /// A zero `required_quiescence` lets long idle periods start at once.
    pub fn new(
        helper: SchedulerHelper,
        delegate: Weak<dyn IdleHelperDelegate>,
        name: &str,
        config: &IdleConfig,
        required_quiescence: Duration,
    ) -> Arc<Self> {
        let idle_queue = helper.new_task_queue(
            TaskQueueSpec::new(format!("{name}.idle_tq"))
                .pump_policy(PumpPolicy::Manual)
                .priority(QueuePriority::BestEffort),
        );
        idle_queue.set_queue_enabled(false);

        let this = Arc::new_cyclic(|weak: &Weak<IdleHelper>| {
            let runner_delegate: Weak<dyn IdleTaskRunnerDelegate> = weak.clone();
            IdleHelper {
                name: name.to_string(),
                idle_task_runner: Arc::new(IdleTaskRunner::new(
                    idle_queue.clone(),
                    helper.control_after_wakeup_task_queue().clone(),
                    runner_delegate,
                )),
                helper,
                delegate,
                idle_queue,
                maximum_idle_period: config.maximum_idle_period(),
                minimum_idle_period: config.minimum_idle_period(),
                retry_enable_long_idle_period_delay: config.retry_enable_long_idle_period_delay(),
                required_quiescence,
                state: Mutex::new(IdleState {
                    period: IdlePeriodState::NotInIdlePeriod,
                    deadline: TimeTicks::ZERO,
                }),
                enable_next_long_idle_period: CancelableGroup::new(),
                on_idle_task_posted: CancelableGroup::new(),
                shutdown: AtomicBool::new(false),
                weak_self: weak.clone(),
            }
        });
        this.helper
            .add_task_observer(Arc::new(IdleTaskObserver(Arc::downgrade(&this))));
        this
    }

    pub fn idle_task_runner(&self) -> Arc<IdleTaskRunner> {
        Arc::clone(&self.idle_task_runner)
    }

    pub fn idle_task_queue(&self) -> &TaskQueue {
        &self.idle_queue
    }

    pub fn idle_period_state(&self) -> IdlePeriodState {
        lock(&self.state).period
    }

    /// Deadline of the current idle period, or `TimeTicks::ZERO` outside one.
    pub fn current_idle_task_deadline(&self) -> TimeTicks {
        lock(&self.state).deadline
    }

    /// True only inside a long idle period whose deadline is the unclamped
    /// maximum.
    pub fn can_exceed_idle_deadline_if_required(&self) -> bool {
        self.idle_period_state() == IdlePeriodState::InLongIdlePeriodWithMaxDeadline
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.enable_next_long_idle_period.cancel();
        self.on_idle_task_posted.cancel();
        info!(helper = %self.name, "idle helper shut down");
    }

    // ── Idle periods ────────────────────────────────────────────────

    /// Open an idle period ending at `deadline`. Refused if less than the
    /// minimum idle period remains.
    pub fn start_idle_period(&self, new_state: IdlePeriodState, now: TimeTicks, deadline: TimeTicks) {
        debug_assert!(new_state.is_in_idle_period());
        let duration = deadline.saturating_duration_since(now);
        if duration < self.minimum_idle_period {
            debug!(
                helper = %self.name,
                remaining_us = duration_micros(duration),
                "not starting idle period, deadline too close"
            );
            return;
        }
        self.idle_queue.set_queue_enabled(true);
        self.idle_queue.pump_queue();
        self.update_state(new_state, deadline);
    }

    /// Close the current idle period and cancel any pending restart.
    /// No-op outside an idle period.
    pub fn end_idle_period(&self) {
        self.enable_next_long_idle_period.cancel();
        self.on_idle_task_posted.cancel();
        if !self.idle_period_state().is_in_idle_period() {
            return;
        }
        self.idle_queue.set_queue_enabled(false);
        self.update_state(IdlePeriodState::NotInIdlePeriod, TimeTicks::ZERO);
    }

    /// Enter a long idle period now if allowed, otherwise schedule another
    /// attempt.
    pub fn enable_long_idle_period(&self) {
        if self.is_shutdown() || self.helper.is_shutdown() {
            return;
        }
        self.end_idle_period();

        if self.should_wait_for_quiescence() {
            self.post_enable_long_idle_period(self.required_quiescence);
            if let Some(delegate) = self.delegate.upgrade() {
                delegate.is_not_quiescent();
            }
            return;
        }

        let now = self.helper.now();
        let (new_state, delay) = self.compute_new_long_idle_period_state(now);
        if new_state.is_in_idle_period() {
            self.start_idle_period(new_state, now, now + delay);
        } else {
            self.post_enable_long_idle_period(delay);
        }
    }

    fn should_wait_for_quiescence(&self) -> bool {
        if self.required_quiescence.is_zero() {
            return false;
        }
        !self.helper.get_and_clear_system_is_quiescent_bit()
    }

    /// The state a long idle period would start in at `now`, and either its
    /// length or how long to wait before trying again.
    fn compute_new_long_idle_period_state(&self, now: TimeTicks) -> (IdlePeriodState, Duration) {
        let Some(delegate) = self.delegate.upgrade() else {
            return (
                IdlePeriodState::NotInIdlePeriod,
                self.retry_enable_long_idle_period_delay,
            );
        };
        if let LongIdleDecision::RetryAfter(delay) = delegate.can_enter_long_idle_period(now) {
            return (IdlePeriodState::NotInIdlePeriod, delay);
        }

        let real_time_domain = self.helper.real_time_domain();
        let duration = match self.helper.manager().next_scheduled_run_time(&real_time_domain) {
            Some(next) => next
                .saturating_duration_since(now)
                .min(self.maximum_idle_period),
            None => self.maximum_idle_period,
        };

        if duration < self.minimum_idle_period {
            return (
                IdlePeriodState::NotInIdlePeriod,
                self.retry_enable_long_idle_period_delay,
            );
        }
        let state = if !self.idle_queue.has_pending_immediate_work() {
            IdlePeriodState::InLongIdlePeriodPaused
        } else if duration == self.maximum_idle_period {
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        } else {
            IdlePeriodState::InLongIdlePeriod
        };
        (state, duration)
    }

    fn post_enable_long_idle_period(&self, delay: Duration) {
        let handle = self.enable_next_long_idle_period.handle();
        let weak = self.weak_self.clone();
        self.helper.control_task_queue().post_task_with_handle(
            move || {
                if let Some(idle_helper) = weak.upgrade() {
                    idle_helper.enable_long_idle_period();
                }
            },
            delay,
            &handle,
        );
    }

    fn update_long_idle_period_state_after_idle_task(&self) {
        if !self.idle_queue.has_pending_immediate_work() {
            let deadline = self.current_idle_task_deadline();
            self.update_state(IdlePeriodState::InLongIdlePeriodPaused, deadline);
            return;
        }
        if !self.idle_queue.needs_pumping() {
            return;
        }
        let (state, deadline) = {
            let state = lock(&self.state);
            (state.period, state.deadline)
        };
        let delay = if state == IdlePeriodState::InLongIdlePeriodWithMaxDeadline {
            Duration::ZERO
        } else {
            deadline.saturating_duration_since(self.helper.now())
        };
        if delay.is_zero() {
            self.enable_long_idle_period();
        } else {
            self.post_enable_long_idle_period(delay);
        }
    }

    fn on_idle_task_posted_on_main_thread(&self) {
        if self.idle_period_state() == IdlePeriodState::InLongIdlePeriodPaused {
            self.post_enable_long_idle_period(Duration::ZERO);
        }
    }

    fn update_state(&self, new_state: IdlePeriodState, deadline: TimeTicks) {
        let old_state = {
            let mut state = lock(&self.state);
            if state.period == new_state {
                return;
            }
            let old = state.period;
            state.period = new_state;
            state.deadline = deadline;
            old
        };
        debug!(
            helper = %self.name,
            from = old_state.as_str(),
            to = new_state.as_str(),
            deadline = %deadline,
            "idle period state changed"
        );

        let Some(delegate) = self.delegate.upgrade() else {
            return;
        };
        if new_state.is_in_idle_period() && !old_state.is_in_idle_period() {
            delegate.on_idle_period_started();
        } else if !new_state.is_in_idle_period() && old_state.is_in_idle_period() {
            delegate.on_idle_period_ended();
        }
    }

    /// After any task: once the deadline has passed a short period ends and
    /// a long one is re-evaluated.
    fn did_process_task(&self) {
        if self.is_shutdown() {
            return;
        }
        let (state, deadline) = {
            let state = lock(&self.state);
            (state.period, state.deadline)
        };
        if !state.is_in_idle_period()
            || state == IdlePeriodState::InLongIdlePeriodPaused
            || self.helper.now() < deadline
        {
            return;
        }
        if state.is_in_long_idle_period() {
            self.enable_long_idle_period();
        } else {
            self.end_idle_period();
        }
    }
}

impl IdleTaskRunnerDelegate for IdleHelper {
    fn on_idle_task_posted(&self) {
        if self.idle_task_runner.runs_tasks_on_current_thread() {
            self.on_idle_task_posted_on_main_thread();
            return;
        }
        let handle = self.on_idle_task_posted.handle();
        let weak = self.weak_self.clone();
        self.helper.control_task_queue().post_task_with_handle(
            move || {
                if let Some(idle_helper) = weak.upgrade() {
                    idle_helper.on_idle_task_posted_on_main_thread();
                }
            },
            Duration::ZERO,
            &handle,
        );
    }

    fn will_process_idle_task(&self) -> TimeTicks {
        self.current_idle_task_deadline()
    }

    fn did_process_idle_task(&self) {
        if self.is_shutdown() {
            return;
        }
        if self.idle_period_state().is_in_long_idle_period() {
            self.update_long_idle_period_state_after_idle_task();
        }
    }
}

/// Task observer registered with the manager on behalf of an idle helper.
/// Holds it weakly so the manager does not keep it alive.
struct IdleTaskObserver(Weak<IdleHelper>);

impl TaskObserver for IdleTaskObserver {
    fn did_process_task(&self, _task: &TaskInfo) {
        if let Some(idle_helper) = self.0.upgrade() {
            idle_helper.did_process_task();
        }
    }
}
