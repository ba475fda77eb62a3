//! Scheduler for worker threads: a default queue plus idle tasks, with none
//! of the renderer's input or frame policy.
//!
//! Workers never produce frames, so every idle period is a long one. A long
//! idle period only starts once the default queue has been quiet for the
//! configured quiescence window.

use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::helper::SchedulerHelper;
use crate::idle::{IdleHelper, IdleHelperDelegate, IdleTaskRunner, LongIdleDecision};
use crate::metrics::{MetricsRecorder, SchedulerMetrics};
use crate::task_queue::{TaskObserver, TaskQueue};
use crate::time::{TickClock, TimeTicks};

const HELPER_NAME: &str = "worker.scheduler";

pub struct WorkerScheduler {
    helper: SchedulerHelper,
    idle_helper: Arc<IdleHelper>,
    metrics: Arc<MetricsRecorder>,
}

impl WorkerScheduler {
    pub fn new(clock: Arc<dyn TickClock>, config: &SchedulerConfig) -> Arc<Self> {
        let helper = SchedulerHelper::new(Arc::clone(&clock), &config.manager, HELPER_NAME);
        let metrics = Arc::new(MetricsRecorder::new(clock));
        helper.add_task_observer(Arc::clone(&metrics) as Arc<dyn TaskObserver>);

        let quiescence = config.worker.required_quiescence_before_long_idle();
        let this = Arc::new_cyclic(|weak: &Weak<WorkerScheduler>| {
            let delegate: Weak<dyn IdleHelperDelegate> = weak.clone();
            let idle_helper =
                IdleHelper::new(helper.clone(), delegate, HELPER_NAME, &config.idle, quiescence);
            WorkerScheduler {
                helper,
                idle_helper,
                metrics,
            }
        });
        info!(
            quiescence_ms = u64::try_from(quiescence.as_millis()).unwrap_or(u64::MAX),
            "worker scheduler created"
        );
        this
    }

    /// Start the first long idle period. Idle tasks posted before this only
    /// run once it is called.
    pub fn init(&self) {
        self.idle_helper.enable_long_idle_period();
    }

    pub fn helper(&self) -> &SchedulerHelper {
        &self.helper
    }

    pub fn default_task_queue(&self) -> &TaskQueue {
        self.helper.default_task_queue()
    }

    pub fn idle_task_runner(&self) -> Arc<IdleTaskRunner> {
        self.idle_helper.idle_task_runner()
    }

    /// Workers have no high priority work to yield to.
    pub fn should_yield_for_high_priority_work(&self) -> bool {
        false
    }

    pub fn can_exceed_idle_deadline_if_required(&self) -> bool {
        self.idle_helper.can_exceed_idle_deadline_if_required()
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.helper.add_task_observer(observer);
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.helper.remove_task_observer(observer);
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.snapshot()
    }

    pub fn is_shutdown(&self) -> bool {
        self.helper.is_shutdown()
    }

    pub fn shutdown(&self) {
        self.idle_helper.shutdown();
        self.helper.shutdown();
        info!("worker scheduler shut down");
    }
}

impl IdleHelperDelegate for WorkerScheduler {
    fn can_enter_long_idle_period(&self, _now: TimeTicks) -> LongIdleDecision {
        LongIdleDecision::Allowed
    }

    fn is_not_quiescent(&self) {
        debug!("worker not quiescent, long idle period postponed");
    }

    fn on_idle_period_started(&self) {
        self.metrics.record_idle_period_started();
    }

    fn on_idle_period_ended(&self) {}
}
