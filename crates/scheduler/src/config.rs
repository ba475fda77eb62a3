use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

// ── Top-level config ────────────────────────────────────────────────

/// Scheduler configuration, typically parsed from TOML.
///
/// Every numeric constant the scheduler relies on lives here with its
/// observed default, so embedders can tune them without code changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Task queue manager selection settings.
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Idle period bounds.
    #[serde(default)]
    pub idle: IdleConfig,

    /// Wake-up alignment for throttled queues.
    #[serde(default)]
    pub throttling: ThrottlingConfig,

    /// Renderer policy engine settings.
    #[serde(default)]
    pub renderer: RendererConfig,

    /// Gesture prediction windows.
    #[serde(default)]
    pub user_model: UserModelConfig,

    /// Worker scheduler settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

// ── Section configs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Consecutive HIGH priority selections before a NORMAL task is preferred.
    #[serde(default = "default_max_high_priority_starvation_tasks")]
    pub max_high_priority_starvation_tasks: usize,
}

fn default_max_high_priority_starvation_tasks() -> usize { 5 }

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_high_priority_starvation_tasks: default_max_high_priority_starvation_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Ceiling for any long idle period.
    #[serde(default = "default_maximum_idle_period_ms")]
    pub maximum_idle_period_ms: u64,
    /// Idle periods shorter than this are not started.
    #[serde(default = "default_minimum_idle_period_ms")]
    pub minimum_idle_period_ms: u64,
    /// Back-off before retrying a long idle period that could not start.
    #[serde(default = "default_retry_enable_long_idle_period_delay_ms")]
    pub retry_enable_long_idle_period_delay_ms: u64,
}

fn default_maximum_idle_period_ms() -> u64 { 50 }
fn default_minimum_idle_period_ms() -> u64 { 1 }
fn default_retry_enable_long_idle_period_delay_ms() -> u64 { 1 }

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            maximum_idle_period_ms: default_maximum_idle_period_ms(),
            minimum_idle_period_ms: default_minimum_idle_period_ms(),
            retry_enable_long_idle_period_delay_ms: default_retry_enable_long_idle_period_delay_ms(),
        }
    }
}

impl IdleConfig {
    pub fn maximum_idle_period(&self) -> Duration {
        Duration::from_millis(self.maximum_idle_period_ms)
    }

    pub fn minimum_idle_period(&self) -> Duration {
        Duration::from_millis(self.minimum_idle_period_ms)
    }

    pub fn retry_enable_long_idle_period_delay(&self) -> Duration {
        Duration::from_millis(self.retry_enable_long_idle_period_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingConfig {
    /// Throttled wake-ups are rounded up to a multiple of this interval.
    #[serde(default = "default_alignment_ms")]
    pub alignment_ms: u64,
}

fn default_alignment_ms() -> u64 { 1000 }

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            alignment_ms: default_alignment_ms(),
        }
    }
}

impl ThrottlingConfig {
    pub fn alignment(&self) -> Duration {
        Duration::from_millis(self.alignment_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Idle tasks stop running this long after all widgets are hidden.
    #[serde(default = "default_end_idle_when_hidden_delay_ms")]
    pub end_idle_when_hidden_delay_ms: u64,
    /// No idle period within this window counts as idle starvation.
    #[serde(default = "default_idle_period_starvation_threshold_ms")]
    pub idle_period_starvation_threshold_ms: u64,
    /// Delay before timers are suspended in a backgrounded renderer.
    #[serde(default = "default_suspend_timers_when_backgrounded_delay_ms")]
    pub suspend_timers_when_backgrounded_delay_ms: u64,
    /// RAIL response budget; tasks longer than this are expensive.
    #[serde(default = "default_rails_response_time_ms")]
    pub rails_response_time_ms: u64,
    /// Compositor priority escalation after an input-driven animation.
    #[serde(default = "default_fling_escalation_limit_ms")]
    pub fling_escalation_limit_ms: u64,
    /// Whether backgrounding suspends the timer queues at all.
    #[serde(default)]
    pub timer_queue_suspension_when_backgrounded: bool,
    /// Whether expensive loading/timer tasks may be blocked during gestures.
    #[serde(default = "default_true")]
    pub expensive_task_blocking_allowed: bool,
    #[serde(default = "default_estimation_sample_count")]
    pub loading_task_estimation_sample_count: usize,
    #[serde(default = "default_estimation_percentile")]
    pub loading_task_estimation_percentile: f64,
    #[serde(default = "default_estimation_sample_count")]
    pub timer_task_estimation_sample_count: usize,
    #[serde(default = "default_estimation_percentile")]
    pub timer_task_estimation_percentile: f64,
    #[serde(default = "default_short_idle_period_duration_sample_count")]
    pub short_idle_period_duration_sample_count: usize,
    #[serde(default = "default_short_idle_period_duration_percentile")]
    pub short_idle_period_duration_percentile: f64,
    /// Idle fraction of a frame above which main-thread compositing is fast.
    #[serde(default = "default_fast_compositing_idle_time_threshold")]
    pub fast_compositing_idle_time_threshold: f64,
    /// Frame interval assumed before the first begin-frame arrives.
    #[serde(default = "default_frame_interval_ms")]
    pub default_frame_interval_ms: u64,
}

fn default_end_idle_when_hidden_delay_ms() -> u64 { 10_000 }
fn default_idle_period_starvation_threshold_ms() -> u64 { 10_000 }
fn default_suspend_timers_when_backgrounded_delay_ms() -> u64 { 5 * 60 * 1000 }
fn default_rails_response_time_ms() -> u64 { 50 }
fn default_fling_escalation_limit_ms() -> u64 { 100 }
fn default_true() -> bool { true }
fn default_estimation_sample_count() -> usize { 1000 }
fn default_estimation_percentile() -> f64 { 99.0 }
fn default_short_idle_period_duration_sample_count() -> usize { 10 }
fn default_short_idle_period_duration_percentile() -> f64 { 50.0 }
fn default_fast_compositing_idle_time_threshold() -> f64 { 0.2 }
fn default_frame_interval_ms() -> u64 { 16 }

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            end_idle_when_hidden_delay_ms: default_end_idle_when_hidden_delay_ms(),
            idle_period_starvation_threshold_ms: default_idle_period_starvation_threshold_ms(),
            suspend_timers_when_backgrounded_delay_ms:
                default_suspend_timers_when_backgrounded_delay_ms(),
            rails_response_time_ms: default_rails_response_time_ms(),
            fling_escalation_limit_ms: default_fling_escalation_limit_ms(),
            timer_queue_suspension_when_backgrounded: false,
            expensive_task_blocking_allowed: default_true(),
            loading_task_estimation_sample_count: default_estimation_sample_count(),
            loading_task_estimation_percentile: default_estimation_percentile(),
            timer_task_estimation_sample_count: default_estimation_sample_count(),
            timer_task_estimation_percentile: default_estimation_percentile(),
            short_idle_period_duration_sample_count:
                default_short_idle_period_duration_sample_count(),
            short_idle_period_duration_percentile: default_short_idle_period_duration_percentile(),
            fast_compositing_idle_time_threshold: default_fast_compositing_idle_time_threshold(),
            default_frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl RendererConfig {
    pub fn end_idle_when_hidden_delay(&self) -> Duration {
        Duration::from_millis(self.end_idle_when_hidden_delay_ms)
    }

    pub fn idle_period_starvation_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_period_starvation_threshold_ms)
    }

    pub fn suspend_timers_when_backgrounded_delay(&self) -> Duration {
        Duration::from_millis(self.suspend_timers_when_backgrounded_delay_ms)
    }

    pub fn rails_response_time(&self) -> Duration {
        Duration::from_millis(self.rails_response_time_ms)
    }

    pub fn fling_escalation_limit(&self) -> Duration {
        Duration::from_millis(self.fling_escalation_limit_ms)
    }

    pub fn default_frame_interval(&self) -> Duration {
        Duration::from_millis(self.default_frame_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModelConfig {
    /// How long priority stays escalated after an input signal.
    #[serde(default = "default_gesture_estimation_limit_ms")]
    pub gesture_estimation_limit_ms: u64,
    /// Another gesture is likely within this window after the last one.
    #[serde(default = "default_expect_subsequent_gesture_ms")]
    pub expect_subsequent_gesture_ms: u64,
    /// Typical gesture length; longer gestures are not expected to continue.
    #[serde(default = "default_median_gesture_duration_ms")]
    pub median_gesture_duration_ms: u64,
}

fn default_gesture_estimation_limit_ms() -> u64 { 100 }
fn default_expect_subsequent_gesture_ms() -> u64 { 2000 }
fn default_median_gesture_duration_ms() -> u64 { 300 }

impl Default for UserModelConfig {
    fn default() -> Self {
        Self {
            gesture_estimation_limit_ms: default_gesture_estimation_limit_ms(),
            expect_subsequent_gesture_ms: default_expect_subsequent_gesture_ms(),
            median_gesture_duration_ms: default_median_gesture_duration_ms(),
        }
    }
}

impl UserModelConfig {
    pub fn gesture_estimation_limit(&self) -> Duration {
        Duration::from_millis(self.gesture_estimation_limit_ms)
    }

    pub fn expect_subsequent_gesture(&self) -> Duration {
        Duration::from_millis(self.expect_subsequent_gesture_ms)
    }

    pub fn median_gesture_duration(&self) -> Duration {
        Duration::from_millis(self.median_gesture_duration_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Quiet time required before the first long idle period.
    #[serde(default = "default_required_quiescence_before_long_idle_ms")]
    pub required_quiescence_before_long_idle_ms: u64,
}

fn default_required_quiescence_before_long_idle_ms() -> u64 { 100 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            required_quiescence_before_long_idle_ms:
                default_required_quiescence_before_long_idle_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn required_quiescence_before_long_idle(&self) -> Duration {
        Duration::from_millis(self.required_quiescence_before_long_idle_ms)
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Apply environment variable overrides.
    ///
    /// - `SCHEDULER_MAX_IDLE_PERIOD_MS` → `idle.maximum_idle_period_ms`
    /// - `SCHEDULER_THROTTLING_ALIGNMENT_MS` → `throttling.alignment_ms`
    /// - `SCHEDULER_EXPENSIVE_TASK_BLOCKING` → `renderer.expensive_task_blocking_allowed`
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCHEDULER_MAX_IDLE_PERIOD_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.idle.maximum_idle_period_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_THROTTLING_ALIGNMENT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.throttling.alignment_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_EXPENSIVE_TASK_BLOCKING") {
            if let Ok(allowed) = v.parse::<bool>() {
                self.renderer.expensive_task_blocking_allowed = allowed;
            }
        }
    }

    /// Reject settings the scheduler cannot operate with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.throttling.alignment_ms == 0 {
            return Err(SchedulerError::Config(
                "throttling.alignment_ms must be greater than zero".into(),
            ));
        }
        if self.idle.minimum_idle_period_ms > self.idle.maximum_idle_period_ms {
            return Err(SchedulerError::Config(format!(
                "idle.minimum_idle_period_ms ({}) exceeds idle.maximum_idle_period_ms ({})",
                self.idle.minimum_idle_period_ms, self.idle.maximum_idle_period_ms
            )));
        }
        let r = &self.renderer;
        for (name, count) in [
            ("loading_task_estimation_sample_count", r.loading_task_estimation_sample_count),
            ("timer_task_estimation_sample_count", r.timer_task_estimation_sample_count),
            ("short_idle_period_duration_sample_count", r.short_idle_period_duration_sample_count),
        ] {
            if count == 0 {
                return Err(SchedulerError::Config(format!("renderer.{name} must be non-zero")));
            }
        }
        for (name, percentile) in [
            ("loading_task_estimation_percentile", r.loading_task_estimation_percentile),
            ("timer_task_estimation_percentile", r.timer_task_estimation_percentile),
            ("short_idle_period_duration_percentile", r.short_idle_period_duration_percentile),
        ] {
            if !(0.0..=100.0).contains(&percentile) {
                return Err(SchedulerError::Config(format!(
                    "renderer.{name} must be within 0..=100, got {percentile}"
                )));
            }
        }
        if r.default_frame_interval_ms == 0 {
            return Err(SchedulerError::Config(
                "renderer.default_frame_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
