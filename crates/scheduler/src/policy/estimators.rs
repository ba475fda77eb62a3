//! Rolling estimates of task cost and per-frame idle time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::manager::lock;
use crate::task_queue::{TaskInfo, TaskObserver};
use crate::time::{TickClock, TimeTicks};

// ── Rolling percentile ──────────────────────────────────────────────

/// Keeps the last `capacity` samples and answers percentile queries.
#[derive(Debug, Clone)]
pub struct RollingDurationHistory {
    capacity: usize,
    chronological: VecDeque<Duration>,
    sorted: Vec<Duration>,
}

impl RollingDurationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chronological: VecDeque::new(),
            sorted: Vec::new(),
        }
    }

    pub fn insert_sample(&mut self, sample: Duration) {
        if self.chronological.len() == self.capacity {
            if let Some(oldest) = self.chronological.pop_front() {
                if let Ok(pos) = self.sorted.binary_search(&oldest) {
                    self.sorted.remove(pos);
                }
            }
        }
        self.chronological.push_back(sample);
        let pos = self.sorted.partition_point(|s| *s <= sample);
        self.sorted.insert(pos, sample);
    }

    /// The sample at `percent` (0..=100) of the sorted history, zero when
    /// empty.
    pub fn percentile(&self, percent: f64) -> Duration {
        let n = self.sorted.len();
        if n == 0 {
            return Duration::ZERO;
        }
        let fraction = percent / 100.0;
        if fraction <= 0.0 {
            return self.sorted[0];
        }
        if fraction >= 1.0 {
            return self.sorted[n - 1];
        }
        let rank = (fraction * n as f64).ceil() as usize;
        self.sorted[rank.clamp(1, n) - 1]
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn clear(&mut self) {
        self.chronological.clear();
        self.sorted.clear();
    }
}

// ── Task cost ───────────────────────────────────────────────────────

struct CostState {
    history: RollingDurationHistory,
    outstanding_task_count: usize,
    task_start_time: TimeTicks,
    expected_task_duration: Duration,
}

/// Observes a set of queues and estimates how long their tasks take.
/// Only outermost tasks are measured.
pub struct TaskCostEstimator {
    clock: Arc<dyn TickClock>,
    percentile: f64,
    state: Mutex<CostState>,
}

impl TaskCostEstimator {
    pub fn new(clock: Arc<dyn TickClock>, sample_count: usize, percentile: f64) -> Self {
        Self {
            clock,
            percentile,
            state: Mutex::new(CostState {
                history: RollingDurationHistory::new(sample_count),
                outstanding_task_count: 0,
                task_start_time: TimeTicks::ZERO,
                expected_task_duration: Duration::ZERO,
            }),
        }
    }

    pub fn expected_task_duration(&self) -> Duration {
        lock(&self.state).expected_task_duration
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.history.clear();
        state.expected_task_duration = Duration::ZERO;
    }
}

impl TaskObserver for TaskCostEstimator {
    fn will_process_task(&self, _task: &TaskInfo) {
        let mut state = lock(&self.state);
        state.outstanding_task_count += 1;
        if state.outstanding_task_count == 1 {
            state.task_start_time = self.clock.now_ticks();
        }
    }

    fn did_process_task(&self, _task: &TaskInfo) {
        let mut state = lock(&self.state);
        state.outstanding_task_count = state.outstanding_task_count.saturating_sub(1);
        if state.outstanding_task_count == 0 {
            let duration = self.clock.now_ticks() - state.task_start_time;
            state.history.insert_sample(duration);
            state.expected_task_duration = state.history.percentile(self.percentile);
        }
    }
}

// ── Idle time ───────────────────────────────────────────────────────

struct IdleTimeState {
    per_frame_compositor_task_runtime: RollingDurationHistory,
    nesting_level: usize,
    did_commit: bool,
    task_start_time: TimeTicks,
    cumulative_compositor_runtime: Duration,
}

/// Observes the compositor queue and estimates how much of each frame is
/// left for idle work once compositor tasks have run.
pub struct IdleTimeEstimator {
    clock: Arc<dyn TickClock>,
    percentile: f64,
    state: Mutex<IdleTimeState>,
}

impl IdleTimeEstimator {
    pub fn new(clock: Arc<dyn TickClock>, sample_count: usize, percentile: f64) -> Self {
        Self {
            clock,
            percentile,
            state: Mutex::new(IdleTimeState {
                per_frame_compositor_task_runtime: RollingDurationHistory::new(sample_count),
                nesting_level: 0,
                did_commit: false,
                task_start_time: TimeTicks::ZERO,
                cumulative_compositor_runtime: Duration::ZERO,
            }),
        }
    }

    pub fn expected_idle_duration(&self, compositor_frame_interval: Duration) -> Duration {
        let expected_compositor_runtime = lock(&self.state)
            .per_frame_compositor_task_runtime
            .percentile(self.percentile);
        compositor_frame_interval.saturating_sub(expected_compositor_runtime)
    }

    /// Marks the end of a frame. Only counts when called from inside an
    /// outermost compositor task.
    pub fn did_commit_frame_to_compositor(&self) {
        let mut state = lock(&self.state);
        if state.nesting_level == 1 {
            state.did_commit = true;
        }
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.task_start_time = TimeTicks::ZERO;
        state.cumulative_compositor_runtime = Duration::ZERO;
        state.per_frame_compositor_task_runtime.clear();
        state.did_commit = false;
    }
}

impl TaskObserver for IdleTimeEstimator {
    fn will_process_task(&self, _task: &TaskInfo) {
        let mut state = lock(&self.state);
        state.nesting_level += 1;
        if state.nesting_level == 1 {
            state.task_start_time = self.clock.now_ticks();
        }
    }

    fn did_process_task(&self, _task: &TaskInfo) {
        let mut state = lock(&self.state);
        state.nesting_level = state.nesting_level.saturating_sub(1);
        if state.nesting_level != 0 {
            return;
        }
        let elapsed = self.clock.now_ticks() - state.task_start_time;
        state.cumulative_compositor_runtime += elapsed;
        if state.did_commit {
            let runtime = std::mem::take(&mut state.cumulative_compositor_runtime);
            state.per_frame_compositor_task_runtime.insert_sample(runtime);
            state.did_commit = false;
        }
    }
}
