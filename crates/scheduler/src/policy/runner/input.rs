use std::time::Duration;

use tracing::trace;

use super::core::{AnyThread, RendererScheduler};
use crate::manager::lock;
use crate::policy::types::{InputEvent, InputEventState, InputEventType, UpdateType, UseCase};
use crate::time::TimeTicks;

/// Whether an input event should influence task priorities at all.
///
/// Mouse presses and drags with the left button down count; other mouse
/// and keyboard events do not. Wheel events are not mouse events here, so
/// they count too.
pub fn should_prioritize_input_event(event: &InputEvent) -> bool {
    if matches!(event.event_type, InputEventType::MouseDown | InputEventType::MouseMove)
        && event.left_button_down
    {
        return true;
    }
    !(event.event_type.is_mouse() || event.event_type.is_keyboard())
}

/// Classify what the user is doing from the input state alone. Also
/// returns how long that classification is expected to hold.
pub(super) fn compute_current_use_case(any: &AnyThread, now: TimeTicks) -> (UseCase, Duration) {
    // Fling ends are not signalled, only cancellations, so flings hold the
    // compositor use case for a fixed window instead.
    if let Some(deadline) = any.fling_compositor_escalation_deadline {
        if deadline > now && !any.awaiting_touch_start_response {
            return (UseCase::CompositorGesture, deadline - now);
        }
    }

    let time_left = any.user_model.time_left_in_user_gesture(now);
    if time_left.is_zero() {
        return (UseCase::None, Duration::ZERO);
    }
    if any.awaiting_touch_start_response {
        return (UseCase::Touchstart, time_left);
    }
    let use_case = if any.last_gesture_was_compositor_driven {
        if any.begin_main_frame_on_critical_path {
            UseCase::SynchronizedGesture
        } else {
            UseCase::CompositorGesture
        }
    } else if any.default_gesture_prevented {
        UseCase::MainThreadCustomInputHandling
    } else {
        UseCase::MainThreadGesture
    };
    (use_case, time_left)
}

fn input_signals_suggest_gesture_in_progress(any: &AnyThread, now: TimeTicks) -> bool {
    matches!(
        compute_current_use_case(any, now).0,
        UseCase::CompositorGesture
            | UseCase::MainThreadCustomInputHandling
            | UseCase::MainThreadGesture
            | UseCase::SynchronizedGesture
            | UseCase::Touchstart
    )
}

impl RendererScheduler {
    // ── Input hooks ─────────────────────────────────────────────────

    /// Called on the compositor thread for every input event it sees, with
    /// whether it handled the event itself or forwarded it.
    pub fn did_handle_input_event_on_compositor_thread(
        &self,
        event: &InputEvent,
        state: InputEventState,
    ) {
        if !should_prioritize_input_event(event) {
            return;
        }
        self.update_for_input_event_on_compositor_thread(event.event_type, state);
    }

    fn update_for_input_event_on_compositor_thread(
        &self,
        event_type: InputEventType,
        state: InputEventState,
    ) {
        let now = self.helper.now();
        let post_update = {
            let mut compositor = lock(&self.compositor_thread);
            let mut any = lock(&self.any_thread);
            trace!(event = ?event_type, state = ?state, "input event on compositor thread");

            let gesture_already_in_progress = input_signals_suggest_gesture_in_progress(&any, now);
            let was_awaiting_touch_start_response = any.awaiting_touch_start_response;

            any.user_model.did_start_processing_input_event(event_type, now);
            any.have_seen_input_since_navigation = true;
            if state == InputEventState::ConsumedByCompositor {
                any.user_model.did_finish_processing_input_event(now);
            }

            match event_type {
                InputEventType::TouchStart => {
                    any.awaiting_touch_start_response = true;
                    // Where the gesture will run is not known yet.
                    any.last_gesture_was_compositor_driven = false;
                    any.have_seen_touchstart = true;
                    any.default_gesture_prevented = true;
                }
                InputEventType::TouchMove => {
                    // A second consecutive touchmove means the page is
                    // consuming the touch sequence.
                    if any.awaiting_touch_start_response
                        && compositor.last_input_type == Some(InputEventType::TouchMove)
                    {
                        any.awaiting_touch_start_response = false;
                    }
                }
                InputEventType::GesturePinchUpdate | InputEventType::GestureScrollUpdate => {
                    // An established gesture can no longer be cancelled, so
                    // lock it to the thread that handles it.
                    any.last_gesture_was_compositor_driven =
                        state == InputEventState::ConsumedByCompositor;
                    any.awaiting_touch_start_response = false;
                    any.default_gesture_prevented = false;
                }
                InputEventType::GestureFlingCancel => {
                    any.fling_compositor_escalation_deadline = None;
                }
                InputEventType::GestureTapDown
                | InputEventType::GestureShowPress
                | InputEventType::GestureScrollEnd => {}
                _ => {
                    any.awaiting_touch_start_response = false;
                }
            }

            compositor.last_input_type = Some(event_type);
            if !gesture_already_in_progress
                || was_awaiting_touch_start_response != any.awaiting_touch_start_response
            {
                self.mark_policy_may_need_update()
            } else {
                false
            }
        };
        if post_update {
            self.post_urgent_policy_update();
        }
    }

    /// Called on the scheduler thread once it has finished handling an
    /// event that was forwarded to it.
    pub fn did_handle_input_event_on_main_thread(&self, event: &InputEvent) {
        if should_prioritize_input_event(event) {
            let now = self.helper.now();
            lock(&self.any_thread)
                .user_model
                .did_finish_processing_input_event(now);
        }
    }

    /// The compositor is animating in response to input, e.g. a fling.
    pub fn did_animate_for_input_on_compositor_thread(&self) {
        let deadline = self.helper.now() + self.config.fling_escalation_limit();
        lock(&self.any_thread).fling_compositor_escalation_deadline = Some(deadline);
    }

    fn post_urgent_policy_update(&self) {
        let weak = self.weak_self.clone();
        self.helper.control_task_queue().post_task(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.update_policy(UpdateType::MayEarlyOutIfPolicyUnchanged);
            }
        });
    }

    // ── Yielding ────────────────────────────────────────────────────

    /// Whether a long-running task should stop early so pending
    /// high-priority work can run. Control tasks never trigger a yield.
    pub fn should_yield_for_high_priority_work(&self) -> bool {
        if self.helper.is_shutdown() {
            return false;
        }
        self.maybe_update_policy();
        let (use_case, touchstart_expected_soon) = {
            let main = lock(&self.main_thread);
            (main.current_use_case, main.touchstart_expected_soon)
        };
        match use_case {
            UseCase::CompositorGesture | UseCase::None => touchstart_expected_soon,
            UseCase::MainThreadGesture
            | UseCase::MainThreadCustomInputHandling
            | UseCase::SynchronizedGesture => {
                self.compositor_tq.has_pending_immediate_work() || touchstart_expected_soon
            }
            UseCase::Touchstart => true,
            UseCase::Loading => false,
        }
    }

    /// Whether high-priority work is likely in the near future.
    pub fn is_high_priority_work_anticipated(&self) -> bool {
        if self.helper.is_shutdown() {
            return false;
        }
        self.maybe_update_policy();
        let main = lock(&self.main_thread);
        main.touchstart_expected_soon
            || matches!(
                main.current_use_case,
                UseCase::Touchstart | UseCase::MainThreadGesture | UseCase::SynchronizedGesture
            )
    }
}
