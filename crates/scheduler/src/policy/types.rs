use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::idle::IdlePeriodState;
use crate::task_queue::QueuePriority;
use crate::time::TimeTicks;

// ── Use cases ───────────────────────────────────────────────────────

/// What the user is believed to be doing right now. Drives the queue
/// policy chosen by the renderer scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UseCase {
    /// No active gesture.
    #[default]
    None,
    /// A scroll or fling the compositor handles without the main thread.
    CompositorGesture,
    /// The main thread handles input but is not known to drive a gesture.
    MainThreadCustomInputHandling,
    /// The main thread drives a scroll or pinch.
    MainThreadGesture,
    /// The compositor drives the gesture but needs main-thread frames.
    SynchronizedGesture,
    /// A touchstart was seen and its response is outstanding.
    Touchstart,
    /// Page load in progress.
    Loading,
}

impl UseCase {
    pub fn as_str(self) -> &'static str {
        match self {
            UseCase::None => "none",
            UseCase::CompositorGesture => "compositor_gesture",
            UseCase::MainThreadCustomInputHandling => "main_thread_custom_input_handling",
            UseCase::MainThreadGesture => "main_thread_gesture",
            UseCase::SynchronizedGesture => "synchronized_gesture",
            UseCase::Touchstart => "touchstart",
            UseCase::Loading => "loading",
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RAIL performance mode reported to embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RailMode {
    Response,
    #[default]
    Animation,
    Idle,
    Load,
}

impl RailMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RailMode::Response => "response",
            RailMode::Animation => "animation",
            RailMode::Idle => "idle",
            RailMode::Load => "load",
        }
    }
}

// ── Input ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InputEventType {
    Undefined,
    MouseDown,
    MouseUp,
    MouseMove,
    MouseEnter,
    MouseLeave,
    ContextMenu,
    MouseWheel,
    RawKeyDown,
    KeyDown,
    KeyUp,
    Char,
    GestureScrollBegin,
    GestureScrollEnd,
    GestureScrollUpdate,
    GestureFlingStart,
    GestureFlingCancel,
    GestureShowPress,
    GestureTap,
    GestureTapUnconfirmed,
    GestureTapDown,
    GestureTapCancel,
    GestureDoubleTap,
    GestureTwoFingerTap,
    GestureLongPress,
    GestureLongTap,
    GesturePinchBegin,
    GesturePinchEnd,
    GesturePinchUpdate,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
}

impl InputEventType {
    /// Wheel events are deliberately not mouse events here.
    pub fn is_mouse(self) -> bool {
        matches!(
            self,
            InputEventType::MouseDown
                | InputEventType::MouseUp
                | InputEventType::MouseMove
                | InputEventType::MouseEnter
                | InputEventType::MouseLeave
                | InputEventType::ContextMenu
        )
    }

    pub fn is_keyboard(self) -> bool {
        matches!(
            self,
            InputEventType::RawKeyDown
                | InputEventType::KeyDown
                | InputEventType::KeyUp
                | InputEventType::Char
        )
    }
}

/// An input event as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub event_type: InputEventType,
    pub left_button_down: bool,
}

impl InputEvent {
    pub fn new(event_type: InputEventType) -> Self {
        Self {
            event_type,
            left_button_down: false,
        }
    }

    pub fn with_left_button_down(event_type: InputEventType) -> Self {
        Self {
            event_type,
            left_button_down: true,
        }
    }
}

impl From<InputEventType> for InputEvent {
    fn from(event_type: InputEventType) -> Self {
        InputEvent::new(event_type)
    }
}

/// Where the compositor thread sent an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventState {
    ConsumedByCompositor,
    ForwardedToMainThread,
}

// ── Frames & navigation ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginFrameArgs {
    pub frame_time: TimeTicks,
    pub interval: Duration,
    /// The main frame is needed to produce the next compositor frame.
    pub on_critical_path: bool,
}

impl BeginFrameArgs {
    pub fn new(frame_time: TimeTicks, interval: Duration) -> Self {
        Self {
            frame_time,
            interval,
            on_critical_path: false,
        }
    }

    pub fn on_critical_path(mut self, on_critical_path: bool) -> Self {
        self.on_critical_path = on_critical_path;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigatingFrameType {
    MainFrame,
    ChildFrame,
}

// ── Policy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeDomainType {
    #[default]
    Real,
    Throttled,
    Virtual,
}

/// What to do with loading or timer queues whose tasks look expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpensiveTaskPolicy {
    #[default]
    Run,
    Block,
    Throttle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskQueuePolicy {
    pub is_enabled: bool,
    pub priority: QueuePriority,
    pub time_domain_type: TimeDomainType,
}

impl Default for TaskQueuePolicy {
    fn default() -> Self {
        Self {
            is_enabled: true,
            priority: QueuePriority::Normal,
            time_domain_type: TimeDomainType::Real,
        }
    }
}

/// The full set of queue settings produced by one policy update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Policy {
    pub compositor_queue_policy: TaskQueuePolicy,
    pub loading_queue_policy: TaskQueuePolicy,
    pub timer_queue_policy: TaskQueuePolicy,
    pub default_queue_policy: TaskQueuePolicy,
    pub rail_mode: RailMode,
}

/// Whether a policy update may skip re-applying an unchanged policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateType {
    MayEarlyOutIfPolicyUnchanged,
    ForceUpdate,
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Point-in-time view of the renderer scheduler's decision state.
#[derive(Debug, Clone, Serialize)]
pub struct PolicySnapshot {
    pub use_case: UseCase,
    pub rail_mode: RailMode,
    pub policy: Policy,
    pub touchstart_expected_soon: bool,
    pub have_seen_a_begin_main_frame: bool,
    pub loading_tasks_seem_expensive: bool,
    pub timer_tasks_seem_expensive: bool,
    pub expensive_task_policy: ExpensiveTaskPolicy,
    pub begin_frame_not_expected_soon: bool,
    pub renderer_hidden: bool,
    pub renderer_backgrounded: bool,
    pub renderer_suspended: bool,
    pub timer_queue_suspend_count: usize,
    pub timer_queue_suspended_when_backgrounded: bool,
    pub navigation_task_expected_count: usize,
    pub in_idle_period: bool,
    pub had_an_idle_period_recently: bool,
    pub idle_period_state: IdlePeriodState,
    pub use_virtual_time: bool,
    pub policy_update_count: u64,
    /// Microseconds on the scheduler clock.
    pub estimated_next_frame_begin_us: u64,
    pub current_policy_expiration_time_us: u64,
    pub longest_jank_free_task_duration_us: u64,
}
