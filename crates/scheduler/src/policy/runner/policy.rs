use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::core::{AnyThread, MainThreadOnly, RendererScheduler};
use super::input::compute_current_use_case;
use crate::idle::{IdleHelperDelegate, LongIdleDecision};
use crate::manager::lock;
use crate::policy::types::{
    ExpensiveTaskPolicy, Policy, RailMode, TaskQueuePolicy, TimeDomainType, UpdateType, UseCase,
};
use crate::task_queue::{QueuePriority, TaskInfo, TaskQueue};
use crate::time::TimeTicks;

const BLOCKED_TASK_INTERVENTION: &str = "Deferred a timer or loading task so that scrolling \
    stays smooth. Keep timer and network tasks under the RAIL response budget of 50ms to \
    avoid this.";

struct PolicyTransition {
    previous: Policy,
    next: Policy,
    previous_use_case: UseCase,
    use_case: UseCase,
    rail_mode_observer: Option<Arc<dyn super::RailModeObserver>>,
}

impl RendererScheduler {
    // ── Updating ────────────────────────────────────────────────────

    /// Run a policy update now if an urgent one is pending.
    pub(super) fn maybe_update_policy(&self) {
        if self.policy_may_need_update() {
            self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
        }
    }

    /// Recompute and re-apply the policy even if it did not change.
    pub fn force_update_policy(&self) {
        self.update_policy(UpdateType::ForceUpdate);
    }

    pub(super) fn update_policy(&self, update_type: UpdateType) {
        if self.helper.is_shutdown() {
            return;
        }
        let now = self.helper.now();

        let (expires_in, transition) = {
            let mut main = lock(&self.main_thread);
            let any = lock(&self.any_thread);
            self.clear_policy_may_need_update();
            main.policy_update_count += 1;

            let previous_use_case = main.current_use_case;
            let (next, expires_in) = self.compute_new_policy(&mut main, &any, now);

            if update_type == UpdateType::MayEarlyOutIfPolicyUnchanged
                && next == main.current_policy
            {
                (expires_in, None)
            } else {
                main.have_reported_blocking_intervention_in_current_policy = false;
                let previous = std::mem::replace(&mut main.current_policy, next);
                (
                    expires_in,
                    Some(PolicyTransition {
                        previous,
                        next,
                        previous_use_case,
                        use_case: main.current_use_case,
                        rail_mode_observer: main.rail_mode_observer.clone(),
                    }),
                )
            }
        };

        if let Some(delay) = expires_in {
            self.delayed_update_policy_runner.set_deadline(delay, now);
        }
        let Some(transition) = transition else {
            return;
        };

        if transition.use_case != transition.previous_use_case {
            info!(
                use_case = %transition.use_case,
                previous = %transition.previous_use_case,
                "use case changed"
            );
        }
        self.apply_policy(&transition.previous, &transition.next);

        if transition.next.rail_mode != transition.previous.rail_mode {
            debug!(rail_mode = transition.next.rail_mode.as_str(), "rail mode changed");
            if let Some(observer) = transition.rail_mode_observer {
                observer.on_rail_mode_changed(transition.next.rail_mode);
            }
        }
    }

    /// Classify the current use case and derive the queue policy for it.
    /// Returns the policy and, if it is time limited, when to revisit it.
    fn compute_new_policy(
        &self,
        main: &mut MainThreadOnly,
        any: &AnyThread,
        now: TimeTicks,
    ) -> (Policy, Option<Duration>) {
        let (use_case, use_case_duration) = compute_current_use_case(any, now);
        main.current_use_case = use_case;

        let (touchstart_expected_soon, touchstart_valid_for) =
            if main.has_visible_render_widget_with_touch_handler {
                any.user_model.is_gesture_expected_soon(now)
            } else {
                (false, Duration::ZERO)
            };
        main.touchstart_expected_soon = touchstart_expected_soon;

        let longest_jank_free = self.longest_jank_free_task_duration(main);
        main.longest_jank_free_task_duration = longest_jank_free;
        main.loading_tasks_seem_expensive =
            self.loading_cost_estimator.expected_task_duration() > longest_jank_free;
        main.timer_tasks_seem_expensive =
            self.timer_cost_estimator.expected_task_duration() > longest_jank_free;

        let mut policy_duration = use_case_duration;
        if !touchstart_valid_for.is_zero()
            && (policy_duration.is_zero() || touchstart_valid_for < policy_duration)
        {
            policy_duration = touchstart_valid_for;
        }
        let expires_in = if policy_duration.is_zero() {
            main.current_policy_expiration_time = TimeTicks::ZERO;
            None
        } else {
            main.current_policy_expiration_time = now + policy_duration;
            Some(policy_duration)
        };

        // Prioritising very slow main-thread compositing would starve every
        // other task source.
        let frame_interval = main.compositor_frame_interval;
        let main_thread_compositing_is_fast = self
            .idle_time_estimator
            .expected_idle_duration(frame_interval)
            .as_secs_f64()
            > frame_interval.as_secs_f64() * self.config.fast_compositing_idle_time_threshold;
        let fast_or_normal = if main_thread_compositing_is_fast {
            QueuePriority::High
        } else {
            QueuePriority::Normal
        };

        let mut policy = Policy::default();
        let mut expensive_task_policy = ExpensiveTaskPolicy::Run;
        match use_case {
            UseCase::CompositorGesture => {
                if touchstart_expected_soon {
                    policy.rail_mode = RailMode::Response;
                    expensive_task_policy = ExpensiveTaskPolicy::Block;
                    policy.compositor_queue_policy.priority = QueuePriority::High;
                } else {
                    // Lets loading work catch up while the compositor runs
                    // the gesture on its own.
                    policy.compositor_queue_policy.priority = QueuePriority::BestEffort;
                }
            }
            UseCase::SynchronizedGesture => {
                policy.compositor_queue_policy.priority = fast_or_normal;
                if touchstart_expected_soon {
                    policy.rail_mode = RailMode::Response;
                    expensive_task_policy = ExpensiveTaskPolicy::Block;
                } else {
                    expensive_task_policy = ExpensiveTaskPolicy::Throttle;
                }
            }
            UseCase::MainThreadCustomInputHandling => {
                // Which tasks the page's own input handling depends on is
                // unknown, so nothing is blocked.
                policy.compositor_queue_policy.priority = fast_or_normal;
            }
            UseCase::MainThreadGesture => {
                policy.compositor_queue_policy.priority = QueuePriority::High;
                if touchstart_expected_soon {
                    policy.rail_mode = RailMode::Response;
                    expensive_task_policy = ExpensiveTaskPolicy::Block;
                } else {
                    expensive_task_policy = ExpensiveTaskPolicy::Throttle;
                }
            }
            UseCase::Touchstart => {
                policy.rail_mode = RailMode::Response;
                policy.compositor_queue_policy.priority = QueuePriority::High;
                policy.loading_queue_policy.is_enabled = false;
                policy.timer_queue_policy.is_enabled = false;
                expensive_task_policy = ExpensiveTaskPolicy::Block;
            }
            UseCase::None => {
                // Blocking is only safe when the next gesture is expected to
                // run on the compositor.
                if touchstart_expected_soon && any.last_gesture_was_compositor_driven {
                    policy.rail_mode = RailMode::Response;
                    expensive_task_policy = ExpensiveTaskPolicy::Block;
                }
            }
            UseCase::Loading => {
                policy.rail_mode = RailMode::Load;
                policy.loading_queue_policy.priority = QueuePriority::High;
                policy.default_queue_policy.priority = QueuePriority::High;
            }
        }

        if main.renderer_hidden {
            policy.rail_mode = RailMode::Idle;
        }

        if expensive_task_policy == ExpensiveTaskPolicy::Block
            && (!main.expensive_task_blocking_allowed
                || !main.have_seen_a_begin_main_frame
                || main.navigation_task_expected_count > 0)
        {
            expensive_task_policy = ExpensiveTaskPolicy::Run;
        }

        match expensive_task_policy {
            ExpensiveTaskPolicy::Run => {}
            ExpensiveTaskPolicy::Block => {
                if main.loading_tasks_seem_expensive {
                    policy.loading_queue_policy.is_enabled = false;
                }
                if main.timer_tasks_seem_expensive {
                    policy.timer_queue_policy.is_enabled = false;
                }
            }
            ExpensiveTaskPolicy::Throttle => {
                if main.loading_tasks_seem_expensive {
                    policy.loading_queue_policy.time_domain_type = TimeDomainType::Throttled;
                }
                if main.timer_tasks_seem_expensive {
                    policy.timer_queue_policy.time_domain_type = TimeDomainType::Throttled;
                }
            }
        }
        main.expensive_task_policy = expensive_task_policy;

        if main.timer_queue_suspend_count != 0 || main.timer_queue_suspended_when_backgrounded {
            policy.timer_queue_policy.is_enabled = false;
            policy.timer_queue_policy.time_domain_type = TimeDomainType::Real;
        }

        if main.renderer_suspended {
            policy.loading_queue_policy.is_enabled = false;
        }

        if main.use_virtual_time {
            for queue_policy in [
                &mut policy.compositor_queue_policy,
                &mut policy.default_queue_policy,
                &mut policy.loading_queue_policy,
                &mut policy.timer_queue_policy,
            ] {
                queue_policy.time_domain_type = TimeDomainType::Virtual;
            }
        }

        (policy, expires_in)
    }

    // ── Applying ────────────────────────────────────────────────────

    fn apply_policy(&self, previous: &Policy, next: &Policy) {
        let (loading, timer) = {
            let queues = lock(&self.queues);
            (queues.loading.clone(), queues.timer.clone())
        };
        self.apply_task_queue_policy(
            &self.compositor_tq,
            &previous.compositor_queue_policy,
            &next.compositor_queue_policy,
        );
        for queue in &loading {
            self.apply_task_queue_policy(
                queue,
                &previous.loading_queue_policy,
                &next.loading_queue_policy,
            );
        }
        for queue in &timer {
            self.apply_task_queue_policy(queue, &previous.timer_queue_policy, &next.timer_queue_policy);
        }
        // Loading tasks and IPCs on the default queue must keep their
        // relative order, so the default queue follows policy too.
        self.apply_task_queue_policy(
            self.helper.default_task_queue(),
            &previous.default_queue_policy,
            &next.default_queue_policy,
        );
    }

    fn apply_task_queue_policy(
        &self,
        queue: &TaskQueue,
        previous: &TaskQueuePolicy,
        next: &TaskQueuePolicy,
    ) {
        if previous.is_enabled != next.is_enabled {
            self.throttling.set_queue_enabled(queue, next.is_enabled);
        }
        if previous.priority != next.priority {
            queue.set_queue_priority(next.priority);
        }
        if previous.time_domain_type != next.time_domain_type {
            if previous.time_domain_type == TimeDomainType::Throttled {
                self.throttling.decrease_throttle_ref_count(queue);
            } else if next.time_domain_type == TimeDomainType::Throttled {
                self.throttling.increase_throttle_ref_count(queue);
            } else if next.time_domain_type == TimeDomainType::Virtual {
                if let Some(domain) = lock(&self.virtual_time_domain).clone() {
                    queue.set_time_domain(domain);
                }
            }
        }
    }

    /// Bring a freshly created loading or timer queue in line with the
    /// current policy for its kind.
    pub(super) fn adopt_queue_policy(&self, queue: &TaskQueue, policy: TaskQueuePolicy) {
        queue.set_queue_enabled(policy.is_enabled);
        queue.set_queue_priority(policy.priority);
        if policy.time_domain_type == TimeDomainType::Throttled {
            self.throttling.increase_throttle_ref_count(queue);
        }
    }

    // ── Estimates ───────────────────────────────────────────────────

    /// The longest a task can run without causing jank in the current use
    /// case: the RAIL response budget, or the idle time left in a frame
    /// when the main thread is producing frames for a gesture.
    pub fn estimate_longest_jank_free_task_duration(&self) -> Duration {
        self.longest_jank_free_task_duration(&lock(&self.main_thread))
    }

    fn longest_jank_free_task_duration(&self, main: &MainThreadOnly) -> Duration {
        match main.current_use_case {
            UseCase::Touchstart | UseCase::CompositorGesture | UseCase::Loading | UseCase::None => {
                self.config.rails_response_time()
            }
            UseCase::MainThreadCustomInputHandling
            | UseCase::MainThreadGesture
            | UseCase::SynchronizedGesture => self
                .idle_time_estimator
                .expected_idle_duration(main.compositor_frame_interval),
        }
    }

    // ── Interventions ───────────────────────────────────────────────

    /// A disabled loading or timer queue held the task that would have run
    /// next. Surfaces one advisory per navigation when the cause was
    /// expensive-task blocking during a gesture.
    pub(super) fn on_tried_to_execute_blocked_task(&self, queue: &TaskQueue, task: &TaskInfo) {
        self.metrics.record_blocked_task(queue.name());
        let report = {
            let mut main = lock(&self.main_thread);
            if main.current_use_case == UseCase::Touchstart
                || main.longest_jank_free_task_duration < self.config.rails_response_time()
                || main.timer_queue_suspend_count != 0
                || main.timer_queue_suspended_when_backgrounded
            {
                return;
            }
            if !main.timer_tasks_seem_expensive && !main.loading_tasks_seem_expensive {
                return;
            }
            if !main.have_reported_blocking_intervention_in_current_policy {
                main.have_reported_blocking_intervention_in_current_policy = true;
                debug!(queue = queue.name(), from = %task.posted_from, "expensive task blocked");
            }
            if main.have_reported_blocking_intervention_since_navigation {
                return;
            }
            if !lock(&self.any_thread).have_seen_touchstart {
                return;
            }
            main.have_reported_blocking_intervention_since_navigation = true;
            true
        };
        if report {
            self.broadcast_intervention(BLOCKED_TASK_INTERVENTION);
        }
    }
}

// ── Idle delegate ───────────────────────────────────────────────────

impl IdleHelperDelegate for RendererScheduler {
    fn can_enter_long_idle_period(&self, now: TimeTicks) -> LongIdleDecision {
        self.maybe_update_policy();
        let main = lock(&self.main_thread);
        if main.current_use_case == UseCase::Touchstart {
            // Try again once the touchstart policy is due to expire.
            return LongIdleDecision::RetryAfter(main.current_policy_expiration_time - now);
        }
        LongIdleDecision::Allowed
    }

    fn is_not_quiescent(&self) {}

    fn on_idle_period_started(&self) {
        lock(&self.any_thread).in_idle_period = true;
        self.metrics.record_idle_period_started();
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }

    fn on_idle_period_ended(&self) {
        let now = self.helper.now();
        {
            let mut any = lock(&self.any_thread);
            any.last_idle_period_end_time = Some(now);
            any.in_idle_period = false;
        }
        self.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
    }
}
