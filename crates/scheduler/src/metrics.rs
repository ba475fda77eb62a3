use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task_queue::{TaskInfo, TaskObserver};
use crate::time::{TickClock, TimeTicks};

/// Execution statistics for one task queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub executed: u64,
    /// Running mean of task durations, on the scheduler clock.
    pub mean_duration: Duration,
    /// Wall-clock time of the most recent task.
    pub last_run: Option<DateTime<Utc>>,
}

impl QueueStats {
    /// Fold one task into the running mean without keeping the samples.
    fn record(&mut self, duration: Duration, at: DateTime<Utc>) {
        self.executed += 1;
        self.last_run = Some(at);
        let mean = self.mean_duration.as_nanos() as i128;
        let step = (duration.as_nanos() as i128 - mean) / i128::from(self.executed);
        let next = u64::try_from(mean + step).unwrap_or(u64::MAX);
        self.mean_duration = Duration::from_nanos(next);
    }
}

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Per task queue name.
    pub queues: HashMap<String, QueueStats>,
    /// Idle periods opened so far.
    pub idle_periods_started: u64,
    /// Times a disabled queue held the task that would have run next.
    pub blocked_tasks: HashMap<String, u64>,
}

impl SchedulerMetrics {
    pub fn record_execution(&mut self, queue_name: &str, duration: Duration) {
        self.queues
            .entry(queue_name.to_string())
            .or_default()
            .record(duration, Utc::now());
    }

    pub fn executed(&self, queue_name: &str) -> u64 {
        self.queues.get(queue_name).map_or(0, |stats| stats.executed)
    }

    pub fn mean_duration(&self, queue_name: &str) -> Option<Duration> {
        self.queues.get(queue_name).map(|stats| stats.mean_duration)
    }

    pub fn record_idle_period_started(&mut self) {
        self.idle_periods_started += 1;
    }

    pub fn record_blocked_task(&mut self, queue_name: &str) {
        *self.blocked_tasks.entry(queue_name.to_string()).or_default() += 1;
    }
}

/// Task observer that times every task and accumulates [`SchedulerMetrics`].
/// Nested tasks are timed separately from the task that spun the nested
/// loop.
pub struct MetricsRecorder {
    clock: Arc<dyn TickClock>,
    started: Mutex<Vec<TimeTicks>>,
    metrics: RwLock<SchedulerMetrics>,
}

impl MetricsRecorder {
    pub fn new(clock: Arc<dyn TickClock>) -> Self {
        Self {
            clock,
            started: Mutex::new(Vec::new()),
            metrics: RwLock::new(SchedulerMetrics::default()),
        }
    }

    pub fn snapshot(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_idle_period_started(&self) {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_idle_period_started();
    }

    pub fn record_blocked_task(&self, queue_name: &str) {
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_blocked_task(queue_name);
    }
}

impl TaskObserver for MetricsRecorder {
    fn will_process_task(&self, _task: &TaskInfo) {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.clock.now_ticks());
    }

    fn did_process_task(&self, task: &TaskInfo) {
        let started = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let Some(started) = started else {
            return;
        };
        let duration = self.clock.now_ticks() - started;
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_execution(&task.queue_name, duration);
    }
}

#[cfg(test)]
mod tests {
    use std::panic::Location;

    use super::*;
    use crate::task_queue::QueueId;
    use crate::time::SimulatedClock;

    fn task_on(queue_name: &str) -> TaskInfo {
        TaskInfo {
            queue_id: QueueId(1),
            queue_name: Arc::from(queue_name),
            sequence_num: 0,
            enqueue_order: 0,
            nestable: true,
            delayed_run_time: None,
            posted_from: Location::caller(),
        }
    }

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("default_tq", Duration::from_millis(100));

        assert_eq!(m.executed("default_tq"), 1);
        assert!(m.queues["default_tq"].last_run.is_some());
        assert_eq!(m.mean_duration("default_tq"), Some(Duration::from_millis(100)));
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("timer_tq", Duration::from_millis(100));
        m.record_execution("timer_tq", Duration::from_millis(200));

        m.record_execution("timer_tq", Duration::from_millis(300));

        assert_eq!(m.executed("timer_tq"), 3);
        let mean = m.mean_duration("timer_tq").unwrap().as_millis();
        assert_eq!(mean, 200);
        assert_eq!(m.executed("default_tq"), 0);
        assert_eq!(m.mean_duration("default_tq"), None);
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.idle_periods_started, 0);
        assert!(m.queues.is_empty());
        assert!(m.blocked_tasks.is_empty());
    }

    #[test]
    fn recorder_times_tasks_on_scheduler_clock() {
        let clock = SimulatedClock::new(TimeTicks::from_millis(10));
        let recorder = MetricsRecorder::new(Arc::new(clock.clone()));
        let task = task_on("loading_tq");

        recorder.will_process_task(&task);
        clock.advance(Duration::from_millis(30));
        recorder.did_process_task(&task);

        let m = recorder.snapshot();
        assert_eq!(m.executed("loading_tq"), 1);
        assert_eq!(m.mean_duration("loading_tq"), Some(Duration::from_millis(30)));
    }

    #[test]
    fn recorder_separates_nested_tasks() {
        let clock = SimulatedClock::new(TimeTicks::from_millis(10));
        let recorder = MetricsRecorder::new(Arc::new(clock.clone()));
        let outer = task_on("outer_tq");
        let inner = task_on("inner_tq");

        recorder.will_process_task(&outer);
        clock.advance(Duration::from_millis(5));
        recorder.will_process_task(&inner);
        clock.advance(Duration::from_millis(10));
        recorder.did_process_task(&inner);
        recorder.did_process_task(&outer);

        let m = recorder.snapshot();
        assert_eq!(m.mean_duration("inner_tq"), Some(Duration::from_millis(10)));
        assert_eq!(m.mean_duration("outer_tq"), Some(Duration::from_millis(15)));
    }

    #[test]
    fn unmatched_did_process_is_ignored() {
        let clock = SimulatedClock::new(TimeTicks::ZERO);
        let recorder = MetricsRecorder::new(Arc::new(clock));
        recorder.did_process_task(&task_on("default_tq"));
        recorder.record_blocked_task("timer_tq");
        recorder.record_idle_period_started();

        let m = recorder.snapshot();
        assert!(m.queues.is_empty());
        assert_eq!(m.blocked_tasks["timer_tq"], 1);
        assert_eq!(m.idle_periods_started, 1);
    }
}
