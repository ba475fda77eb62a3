use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{RendererConfig, SchedulerConfig};
use crate::deadline::DeadlineTaskRunner;
use crate::helper::SchedulerHelper;
use crate::idle::{IdleHelper, IdleHelperDelegate, IdleTaskRunner};
use crate::manager::{lock, ManagerObserver};
use crate::metrics::{MetricsRecorder, SchedulerMetrics};
use crate::policy::estimators::{IdleTimeEstimator, TaskCostEstimator};
use crate::policy::types::{
    ExpensiveTaskPolicy, InputEventType, Policy, PolicySnapshot, RailMode, UpdateType, UseCase,
};
use crate::policy::user_model::UserModel;
use crate::task_queue::{CancelableGroup, TaskInfo, TaskObserver, TaskQueue, TaskQueueSpec};
use crate::throttling::ThrottlingHelper;
use crate::time::{duration_micros, TickClock, TimeTicks};
use crate::time_domain::TimeDomain;

/// Receives advisories about scheduler interventions that affect page
/// behaviour, e.g. to surface them as console warnings.
pub trait InterventionReporter: Send + Sync {
    fn report_intervention(&self, message: &str);
}

/// Notified whenever a policy update changes the RAIL mode.
pub trait RailModeObserver: Send + Sync {
    fn on_rail_mode_changed(&self, rail_mode: RailMode);
}

// ── Thread-affine state ─────────────────────────────────────────────

/// State only touched on the scheduler thread.
pub(super) struct MainThreadOnly {
    pub(super) current_use_case: UseCase,
    pub(super) current_policy: Policy,
    pub(super) current_policy_expiration_time: TimeTicks,
    pub(super) estimated_next_frame_begin: TimeTicks,
    pub(super) compositor_frame_interval: Duration,
    pub(super) longest_jank_free_task_duration: Duration,
    pub(super) expensive_task_policy: ExpensiveTaskPolicy,
    pub(super) timer_queue_suspend_count: usize,
    pub(super) navigation_task_expected_count: usize,
    pub(super) renderer_hidden: bool,
    pub(super) renderer_backgrounded: bool,
    pub(super) renderer_suspended: bool,
    pub(super) timer_queue_suspension_when_backgrounded_enabled: bool,
    pub(super) timer_queue_suspended_when_backgrounded: bool,
    pub(super) was_shutdown: bool,
    pub(super) loading_tasks_seem_expensive: bool,
    pub(super) timer_tasks_seem_expensive: bool,
    pub(super) touchstart_expected_soon: bool,
    pub(super) have_seen_a_begin_main_frame: bool,
    pub(super) have_reported_blocking_intervention_in_current_policy: bool,
    pub(super) have_reported_blocking_intervention_since_navigation: bool,
    pub(super) has_visible_render_widget_with_touch_handler: bool,
    pub(super) begin_frame_not_expected_soon: bool,
    pub(super) expensive_task_blocking_allowed: bool,
    pub(super) use_virtual_time: bool,
    pub(super) policy_update_count: u64,
    pub(super) rail_mode_observer: Option<Arc<dyn RailModeObserver>>,
}

/// Input state written from the compositor thread and read on the
/// scheduler thread.
pub(super) struct AnyThread {
    pub(super) user_model: UserModel,
    pub(super) last_idle_period_end_time: Option<TimeTicks>,
    pub(super) fling_compositor_escalation_deadline: Option<TimeTicks>,
    pub(super) awaiting_touch_start_response: bool,
    pub(super) in_idle_period: bool,
    pub(super) begin_main_frame_on_critical_path: bool,
    pub(super) last_gesture_was_compositor_driven: bool,
    pub(super) default_gesture_prevented: bool,
    pub(super) have_seen_input_since_navigation: bool,
    pub(super) have_seen_touchstart: bool,
}

pub(super) struct CompositorThreadOnly {
    pub(super) last_input_type: Option<InputEventType>,
}

#[derive(Default)]
pub(super) struct QueueSets {
    pub(super) loading: Vec<TaskQueue>,
    pub(super) timer: Vec<TaskQueue>,
    pub(super) unthrottled: Vec<TaskQueue>,
}

// ── Scheduler ───────────────────────────────────────────────────────

/// The renderer main-thread scheduler.
///
/// Owns the standard queues (default, compositor, loading, timer, idle and
/// control) and re-prioritises them as input, frame and lifecycle signals
/// arrive. Input hooks may be called from any thread; everything else must
/// run on the scheduler thread.
///
/// Lock order: `main_thread`, then `any_thread`; `compositor_thread`, then
/// `any_thread`. None of them is held while calling into the idle helper,
/// the throttling helper or an observer.
pub struct RendererScheduler {
    pub(super) config: RendererConfig,
    pub(super) helper: SchedulerHelper,
    pub(super) idle_helper: Arc<IdleHelper>,
    pub(super) throttling: Arc<ThrottlingHelper>,
    pub(super) compositor_tq: TaskQueue,
    pub(super) default_loading_tq: TaskQueue,
    pub(super) default_timer_tq: TaskQueue,
    pub(super) delayed_update_policy_runner: DeadlineTaskRunner,
    pub(super) loading_cost_estimator: Arc<TaskCostEstimator>,
    pub(super) timer_cost_estimator: Arc<TaskCostEstimator>,
    pub(super) idle_time_estimator: Arc<IdleTimeEstimator>,
    pub(super) metrics: Arc<MetricsRecorder>,
    pub(super) main_thread: Mutex<MainThreadOnly>,
    pub(super) any_thread: Mutex<AnyThread>,
    pub(super) compositor_thread: Mutex<CompositorThreadOnly>,
    pub(super) queues: Mutex<QueueSets>,
    pub(super) virtual_time_domain: Mutex<Option<Arc<dyn TimeDomain>>>,
    pub(super) reporters: Mutex<Vec<Arc<dyn InterventionReporter>>>,
    /// Set while an urgent policy update is posted but has not run.
    pub(super) policy_may_need_update: AtomicBool,
    pub(super) end_renderer_hidden_idle_period: CancelableGroup,
    pub(super) suspend_timers_when_backgrounded: CancelableGroup,
    pub(super) weak_self: Weak<RendererScheduler>,
}

const HELPER_NAME: &str = "renderer.scheduler";

fn loading_queue_spec(name: &str) -> TaskQueueSpec {
    TaskQueueSpec::new(name)
        .should_monitor_quiescence(true)
        .should_report_when_execution_blocked(true)
}

impl RendererScheduler {
    /// Build a renderer scheduler bound to the calling thread.
    pub fn new(clock: Arc<dyn TickClock>, config: &SchedulerConfig) -> Arc<Self> {
        let renderer = config.renderer.clone();
        let helper = SchedulerHelper::new(Arc::clone(&clock), &config.manager, HELPER_NAME);

        let compositor_tq =
            helper.new_task_queue(TaskQueueSpec::new("compositor_tq").should_monitor_quiescence(true));
        let idle_time_estimator = Arc::new(IdleTimeEstimator::new(
            Arc::clone(&clock),
            renderer.short_idle_period_duration_sample_count,
            renderer.short_idle_period_duration_percentile,
        ));
        compositor_tq.add_task_observer(Arc::clone(&idle_time_estimator) as Arc<dyn TaskObserver>);

        let loading_cost_estimator = Arc::new(TaskCostEstimator::new(
            Arc::clone(&clock),
            renderer.loading_task_estimation_sample_count,
            renderer.loading_task_estimation_percentile,
        ));
        let timer_cost_estimator = Arc::new(TaskCostEstimator::new(
            Arc::clone(&clock),
            renderer.timer_task_estimation_sample_count,
            renderer.timer_task_estimation_percentile,
        ));
        let default_loading_tq = helper.new_task_queue(loading_queue_spec("default_loading_tq"));
        default_loading_tq
            .add_task_observer(Arc::clone(&loading_cost_estimator) as Arc<dyn TaskObserver>);
        let default_timer_tq = helper.new_task_queue(loading_queue_spec("default_timer_tq"));
        default_timer_tq
            .add_task_observer(Arc::clone(&timer_cost_estimator) as Arc<dyn TaskObserver>);

        let throttling = ThrottlingHelper::new(helper.clone(), &config.throttling);
        let metrics = Arc::new(MetricsRecorder::new(Arc::clone(&clock)));
        helper.add_task_observer(Arc::clone(&metrics) as Arc<dyn TaskObserver>);

        let this = Arc::new_cyclic(|weak: &Weak<RendererScheduler>| {
            let delegate: Weak<dyn IdleHelperDelegate> = weak.clone();
            let idle_helper =
                IdleHelper::new(helper.clone(), delegate, HELPER_NAME, &config.idle, Duration::ZERO);

            let update_target = weak.clone();
            let delayed_update_policy_runner = DeadlineTaskRunner::new(
                helper.control_task_queue().clone(),
                Arc::new(move || {
                    if let Some(scheduler) = update_target.upgrade() {
                        scheduler.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
                    }
                }),
            );

            RendererScheduler {
                main_thread: Mutex::new(MainThreadOnly {
                    current_use_case: UseCase::None,
                    current_policy: Policy::default(),
                    current_policy_expiration_time: TimeTicks::ZERO,
                    estimated_next_frame_begin: TimeTicks::ZERO,
                    compositor_frame_interval: renderer.default_frame_interval(),
                    longest_jank_free_task_duration: Duration::ZERO,
                    expensive_task_policy: ExpensiveTaskPolicy::Run,
                    timer_queue_suspend_count: 0,
                    navigation_task_expected_count: 0,
                    renderer_hidden: false,
                    renderer_backgrounded: false,
                    renderer_suspended: false,
                    timer_queue_suspension_when_backgrounded_enabled: renderer
                        .timer_queue_suspension_when_backgrounded,
                    timer_queue_suspended_when_backgrounded: false,
                    was_shutdown: false,
                    loading_tasks_seem_expensive: false,
                    timer_tasks_seem_expensive: false,
                    touchstart_expected_soon: false,
                    have_seen_a_begin_main_frame: false,
                    have_reported_blocking_intervention_in_current_policy: false,
                    have_reported_blocking_intervention_since_navigation: false,
                    has_visible_render_widget_with_touch_handler: false,
                    begin_frame_not_expected_soon: false,
                    expensive_task_blocking_allowed: renderer.expensive_task_blocking_allowed,
                    use_virtual_time: false,
                    policy_update_count: 0,
                    rail_mode_observer: None,
                }),
                any_thread: Mutex::new(AnyThread {
                    user_model: UserModel::new(&config.user_model),
                    last_idle_period_end_time: None,
                    fling_compositor_escalation_deadline: None,
                    awaiting_touch_start_response: false,
                    in_idle_period: false,
                    begin_main_frame_on_critical_path: false,
                    last_gesture_was_compositor_driven: false,
                    default_gesture_prevented: true,
                    have_seen_input_since_navigation: false,
                    have_seen_touchstart: false,
                }),
                compositor_thread: Mutex::new(CompositorThreadOnly {
                    last_input_type: None,
                }),
                queues: Mutex::new(QueueSets {
                    loading: vec![default_loading_tq.clone()],
                    timer: vec![default_timer_tq.clone()],
                    unthrottled: Vec::new(),
                }),
                config: renderer,
                helper,
                idle_helper,
                throttling,
                compositor_tq,
                default_loading_tq,
                default_timer_tq,
                delayed_update_policy_runner,
                loading_cost_estimator,
                timer_cost_estimator,
                idle_time_estimator,
                metrics,
                virtual_time_domain: Mutex::new(None),
                reporters: Mutex::new(Vec::new()),
                policy_may_need_update: AtomicBool::new(false),
                end_renderer_hidden_idle_period: CancelableGroup::new(),
                suspend_timers_when_backgrounded: CancelableGroup::new(),
                weak_self: weak.clone(),
            }
        });

        this.helper
            .set_observer(Arc::new(QueueLifecycleObserver(Arc::downgrade(&this))));
        info!("renderer scheduler initialized");
        this
    }

    // ── Queues ──────────────────────────────────────────────────────

    pub fn helper(&self) -> &SchedulerHelper {
        &self.helper
    }

    pub fn default_task_queue(&self) -> &TaskQueue {
        self.helper.default_task_queue()
    }

    pub fn compositor_task_queue(&self) -> &TaskQueue {
        &self.compositor_tq
    }

    pub fn loading_task_queue(&self) -> &TaskQueue {
        &self.default_loading_tq
    }

    pub fn timer_task_queue(&self) -> &TaskQueue {
        &self.default_timer_tq
    }

    pub fn control_task_queue(&self) -> &TaskQueue {
        self.helper.control_task_queue()
    }

    pub fn idle_task_runner(&self) -> Arc<IdleTaskRunner> {
        self.idle_helper.idle_task_runner()
    }

    /// A new loading queue. It follows the loading policy and feeds the
    /// loading task cost estimate.
    pub fn new_loading_task_queue(&self, name: &str) -> TaskQueue {
        let queue = self.helper.new_task_queue(self.with_virtual_time(loading_queue_spec(name)));
        let policy = lock(&self.main_thread).current_policy.loading_queue_policy;
        lock(&self.queues).loading.push(queue.clone());
        self.adopt_queue_policy(&queue, policy);
        queue.add_task_observer(Arc::clone(&self.loading_cost_estimator) as Arc<dyn TaskObserver>);
        queue
    }

    /// A new timer queue. It follows the timer policy, including
    /// suspension, and feeds the timer task cost estimate.
    pub fn new_timer_task_queue(&self, name: &str) -> TaskQueue {
        let queue = self.helper.new_task_queue(self.with_virtual_time(loading_queue_spec(name)));
        let policy = lock(&self.main_thread).current_policy.timer_queue_policy;
        lock(&self.queues).timer.push(queue.clone());
        self.adopt_queue_policy(&queue, policy);
        queue.add_task_observer(Arc::clone(&self.timer_cost_estimator) as Arc<dyn TaskObserver>);
        queue
    }

    /// A queue that policy updates never touch.
    pub fn new_unthrottled_task_queue(&self, name: &str) -> TaskQueue {
        let queue = self.helper.new_task_queue(
            self.with_virtual_time(TaskQueueSpec::new(name).should_monitor_quiescence(true)),
        );
        lock(&self.queues).unthrottled.push(queue.clone());
        queue
    }

    fn with_virtual_time(&self, spec: TaskQueueSpec) -> TaskQueueSpec {
        match lock(&self.virtual_time_domain).as_ref() {
            Some(domain) => spec.time_domain(Arc::clone(domain)),
            None => spec,
        }
    }

    // ── Observers ───────────────────────────────────────────────────

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.helper.add_task_observer(observer);
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.helper.remove_task_observer(observer);
    }

    pub fn add_intervention_reporter(&self, reporter: Arc<dyn InterventionReporter>) {
        lock(&self.reporters).push(reporter);
    }

    pub fn remove_intervention_reporter(&self, reporter: &Arc<dyn InterventionReporter>) {
        lock(&self.reporters).retain(|r| !Arc::ptr_eq(r, reporter));
    }

    pub fn set_rail_mode_observer(&self, observer: Option<Arc<dyn RailModeObserver>>) {
        lock(&self.main_thread).rail_mode_observer = observer;
    }

    pub(super) fn broadcast_intervention(&self, message: &str) {
        warn!(message, "scheduler intervention");
        let reporters = lock(&self.reporters).clone();
        for reporter in reporters {
            reporter.report_intervention(message);
        }
    }

    // ── State ───────────────────────────────────────────────────────

    pub fn current_use_case(&self) -> UseCase {
        lock(&self.main_thread).current_use_case
    }

    pub fn rail_mode(&self) -> RailMode {
        lock(&self.main_thread).current_policy.rail_mode
    }

    /// True only inside a long idle period that was not clamped by a
    /// pending delayed task.
    pub fn can_exceed_idle_deadline_if_required(&self) -> bool {
        self.idle_helper.can_exceed_idle_deadline_if_required()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.snapshot()
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        let now = self.helper.now();
        let idle_period_state = self.idle_helper.idle_period_state();
        let main = lock(&self.main_thread);
        let any = lock(&self.any_thread);
        let had_an_idle_period_recently = any.in_idle_period
            || any.last_idle_period_end_time.is_some_and(|end| {
                now - end <= self.config.idle_period_starvation_threshold()
            });
        PolicySnapshot {
            use_case: main.current_use_case,
            rail_mode: main.current_policy.rail_mode,
            policy: main.current_policy,
            touchstart_expected_soon: main.touchstart_expected_soon,
            have_seen_a_begin_main_frame: main.have_seen_a_begin_main_frame,
            loading_tasks_seem_expensive: main.loading_tasks_seem_expensive,
            timer_tasks_seem_expensive: main.timer_tasks_seem_expensive,
            expensive_task_policy: main.expensive_task_policy,
            begin_frame_not_expected_soon: main.begin_frame_not_expected_soon,
            renderer_hidden: main.renderer_hidden,
            renderer_backgrounded: main.renderer_backgrounded,
            renderer_suspended: main.renderer_suspended,
            timer_queue_suspend_count: main.timer_queue_suspend_count,
            timer_queue_suspended_when_backgrounded: main.timer_queue_suspended_when_backgrounded,
            navigation_task_expected_count: main.navigation_task_expected_count,
            in_idle_period: any.in_idle_period,
            had_an_idle_period_recently,
            idle_period_state,
            use_virtual_time: main.use_virtual_time,
            policy_update_count: main.policy_update_count,
            estimated_next_frame_begin_us: main.estimated_next_frame_begin.as_micros(),
            current_policy_expiration_time_us: main.current_policy_expiration_time.as_micros(),
            longest_jank_free_task_duration_us: duration_micros(main.longest_jank_free_task_duration),
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────

    pub fn is_shutdown(&self) -> bool {
        self.helper.is_shutdown()
    }

    pub fn shutdown(&self) {
        self.end_renderer_hidden_idle_period.cancel();
        self.suspend_timers_when_backgrounded.cancel();
        self.idle_helper.shutdown();
        self.helper.shutdown();
        lock(&self.main_thread).was_shutdown = true;
        info!("renderer scheduler shut down");
    }

    pub(super) fn mark_policy_may_need_update(&self) -> bool {
        !self.policy_may_need_update.swap(true, Ordering::SeqCst)
    }

    pub(super) fn clear_policy_may_need_update(&self) {
        self.policy_may_need_update.store(false, Ordering::SeqCst);
    }

    pub(super) fn policy_may_need_update(&self) -> bool {
        self.policy_may_need_update.load(Ordering::SeqCst)
    }
}

/// Forwards manager callbacks without keeping the scheduler alive.
struct QueueLifecycleObserver(Weak<RendererScheduler>);

impl ManagerObserver for QueueLifecycleObserver {
    fn on_unregister_task_queue(&self, queue: &TaskQueue) {
        if let Some(scheduler) = self.0.upgrade() {
            scheduler.on_unregister_task_queue(queue);
        }
    }

    fn on_tried_to_execute_blocked_task(&self, queue: &TaskQueue, task: &TaskInfo) {
        if let Some(scheduler) = self.0.upgrade() {
            scheduler.on_tried_to_execute_blocked_task(queue, task);
        }
    }
}

impl RendererScheduler {
    fn on_unregister_task_queue(&self, queue: &TaskQueue) {
        self.throttling.unregister_task_queue(queue);
        let mut queues = lock(&self.queues);
        if let Some(pos) = queues.loading.iter().position(|q| q == queue) {
            queues.loading.remove(pos);
            let estimator = Arc::clone(&self.loading_cost_estimator) as Arc<dyn TaskObserver>;
            queue.remove_task_observer(&estimator);
        } else if let Some(pos) = queues.timer.iter().position(|q| q == queue) {
            queues.timer.remove(pos);
            let estimator = Arc::clone(&self.timer_cost_estimator) as Arc<dyn TaskObserver>;
            queue.remove_task_observer(&estimator);
        } else {
            queues.unthrottled.retain(|q| q != queue);
        }
    }
}
