//! Short-horizon predictions about user gestures.

use std::time::Duration;

use crate::config::UserModelConfig;
use crate::policy::types::InputEventType;
use crate::time::TimeTicks;

/// Tracks recent input to predict how long the current gesture lasts and
/// whether another one is about to start.
#[derive(Debug, Clone)]
pub struct UserModel {
    gesture_estimation_limit: Duration,
    expect_subsequent_gesture: Duration,
    median_gesture_duration: Duration,
    pending_input_event_count: usize,
    last_input_signal_time: Option<TimeTicks>,
    last_gesture_start_time: Option<TimeTicks>,
    last_continuous_gesture_time: Option<TimeTicks>,
    is_gesture_active: bool,
}

impl UserModel {
    pub fn new(config: &UserModelConfig) -> Self {
        Self {
            gesture_estimation_limit: config.gesture_estimation_limit(),
            expect_subsequent_gesture: config.expect_subsequent_gesture(),
            median_gesture_duration: config.median_gesture_duration(),
            pending_input_event_count: 0,
            last_input_signal_time: None,
            last_gesture_start_time: None,
            last_continuous_gesture_time: None,
            is_gesture_active: false,
        }
    }

    pub fn did_start_processing_input_event(&mut self, event_type: InputEventType, now: TimeTicks) {
        self.last_input_signal_time = Some(now);
        if matches!(
            event_type,
            InputEventType::TouchStart
                | InputEventType::GestureScrollBegin
                | InputEventType::GesturePinchBegin
        ) {
            if !self.is_gesture_active {
                self.last_gesture_start_time = Some(now);
            }
            self.is_gesture_active = true;
        }

        if matches!(
            event_type,
            InputEventType::GestureScrollBegin
                | InputEventType::GestureScrollEnd
                | InputEventType::GestureScrollUpdate
                | InputEventType::GestureFlingStart
                | InputEventType::GestureFlingCancel
                | InputEventType::GesturePinchBegin
                | InputEventType::GesturePinchEnd
                | InputEventType::GesturePinchUpdate
        ) {
            self.last_continuous_gesture_time = Some(now);
        }

        // Flings run on the compositor; the gesture is over as far as the
        // main thread is concerned.
        if matches!(
            event_type,
            InputEventType::GestureScrollEnd
                | InputEventType::GesturePinchEnd
                | InputEventType::GestureFlingStart
                | InputEventType::TouchEnd
        ) {
            self.is_gesture_active = false;
        }

        self.pending_input_event_count += 1;
    }

    pub fn did_finish_processing_input_event(&mut self, now: TimeTicks) {
        self.last_input_signal_time = Some(now);
        self.pending_input_event_count = self.pending_input_event_count.saturating_sub(1);
    }

    /// How much longer input priority should stay escalated. Zero once the
    /// estimation window after the last input signal has passed.
    pub fn time_left_in_user_gesture(&self, now: TimeTicks) -> Duration {
        if self.pending_input_event_count > 0 {
            return self.gesture_estimation_limit;
        }
        match self.last_input_signal_time {
            Some(last) if last + self.gesture_estimation_limit >= now => {
                (last + self.gesture_estimation_limit) - now
            }
            _ => Duration::ZERO,
        }
    }

    /// Whether a new gesture is likely soon, and for how long that answer
    /// holds.
    pub fn is_gesture_expected_soon(&self, now: TimeTicks) -> (bool, Duration) {
        if self.is_gesture_active {
            if let Some(remaining) = self.time_left_in_typical_gesture(now) {
                // Expected to carry on rather than be followed by a new one.
                return (false, remaining);
            }
            return (true, self.expect_subsequent_gesture);
        }

        match self.last_continuous_gesture_time {
            Some(last) if last + self.expect_subsequent_gesture > now => {
                (true, (last + self.expect_subsequent_gesture) - now)
            }
            _ => (false, Duration::ZERO),
        }
    }

    fn time_left_in_typical_gesture(&self, now: TimeTicks) -> Option<Duration> {
        let expected_end = self.last_gesture_start_time? + self.median_gesture_duration;
        (expected_end > now).then(|| expected_end - now)
    }

    pub fn reset(&mut self, _now: TimeTicks) {
        self.pending_input_event_count = 0;
        self.last_input_signal_time = None;
        self.last_gesture_start_time = None;
        self.last_continuous_gesture_time = None;
        self.is_gesture_active = false;
    }

    pub fn is_gesture_active(&self) -> bool {
        self.is_gesture_active
    }

    pub fn pending_input_event_count(&self) -> usize {
        self.pending_input_event_count
    }
}
