use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::config::SchedulerConfig;
use crate::idle::IdlePeriodState;
use crate::policy::types::{
    BeginFrameArgs, ExpensiveTaskPolicy, InputEvent, InputEventState, InputEventType,
    NavigatingFrameType, RailMode, UseCase,
};
use crate::task_queue::{QueuePriority, TaskQueue};
use crate::time::{SimulatedClock, TimeTicks};
use crate::time_domain::TimeDomainKind;

use InputEventState::{ConsumedByCompositor, ForwardedToMainThread};

type RunOrder = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl InterventionReporter for RecordingReporter {
    fn report_intervention(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

#[derive(Default)]
struct RecordingRailObserver {
    modes: Mutex<Vec<RailMode>>,
}

impl RailModeObserver for RecordingRailObserver {
    fn on_rail_mode_changed(&self, rail_mode: RailMode) {
        self.modes.lock().unwrap().push(rail_mode);
    }
}

struct Fixture {
    clock: SimulatedClock,
    scheduler: Arc<RendererScheduler>,
    run_order: RunOrder,
}

impl Fixture {
    fn run_until_idle(&self) {
        self.scheduler.helper().manager().run_until_idle();
    }

    fn run_for_period(&self, period: Duration) {
        self.scheduler
            .helper()
            .manager()
            .run_for_period(&self.clock, period);
    }

    fn run_order(&self) -> Vec<String> {
        self.run_order.lock().unwrap().clone()
    }

    fn clear_run_order(&self) {
        self.run_order.lock().unwrap().clear();
    }

    /// Post one task per label. The first letter picks the queue:
    /// D default, C compositor, L loading, T timer, I idle.
    fn post_test_tasks(&self, labels: &str) {
        for label in labels.split_whitespace() {
            let run_order = Arc::clone(&self.run_order);
            let name = label.to_string();
            let record = move || run_order.lock().unwrap().push(name);
            match label.as_bytes()[0] {
                b'D' => self.scheduler.default_task_queue().post_task(record),
                b'C' => self.scheduler.compositor_task_queue().post_task(record),
                b'L' => self.scheduler.loading_task_queue().post_task(record),
                b'T' => self.scheduler.timer_task_queue().post_task(record),
                b'I' => self
                    .scheduler
                    .idle_task_runner()
                    .post_idle_task(move |_deadline| record()),
                other => panic!("unknown queue letter {}", other as char),
            };
        }
    }

    fn input(&self, event_type: InputEventType, state: InputEventState) {
        self.scheduler
            .did_handle_input_event_on_compositor_thread(&InputEvent::new(event_type), state);
    }

    fn main_thread_input(&self, event_type: InputEventType) {
        self.scheduler
            .did_handle_input_event_on_main_thread(&InputEvent::new(event_type));
    }

    fn do_main_frame(&self) {
        let args = BeginFrameArgs::new(self.clock.now(), ms(16));
        self.scheduler.will_begin_frame(&args);
        self.scheduler.did_commit_frame_to_compositor();
    }

    fn enable_idle_tasks(&self) {
        self.do_main_frame();
    }

    fn simulate_compositor_gesture_start(&self, send_touch_start: bool) {
        if send_touch_start {
            self.input(InputEventType::TouchStart, ConsumedByCompositor);
            self.input(InputEventType::TouchMove, ConsumedByCompositor);
            self.input(InputEventType::TouchMove, ConsumedByCompositor);
        }
        self.input(InputEventType::GestureScrollBegin, ConsumedByCompositor);
        self.input(InputEventType::GestureScrollUpdate, ConsumedByCompositor);
    }

    /// Touch sequence forwarded to and handled by the main thread, then an
    /// optional gesture event handled the same way.
    fn simulate_main_thread_gesture_start(&self, gesture: Option<InputEventType>) {
        for event in [
            InputEventType::TouchStart,
            InputEventType::TouchMove,
            InputEventType::TouchMove,
        ] {
            self.input(event, ForwardedToMainThread);
        }
        for event in [
            InputEventType::TouchStart,
            InputEventType::TouchMove,
            InputEventType::TouchMove,
        ] {
            self.main_thread_input(event);
        }
        if let Some(gesture) = gesture {
            self.input(gesture, ForwardedToMainThread);
            self.main_thread_input(gesture);
        }
    }

    /// Ten timer tasks that each take 500ms.
    fn simulate_expensive_timer_tasks(&self) {
        for _ in 0..10 {
            let clock = self.clock.clone();
            self.scheduler
                .timer_task_queue()
                .post_task(move || clock.advance(ms(500)));
        }
        self.run_until_idle();
    }

    /// A finished compositor-driven scroll, followed by enough quiet time
    /// for the next touchstart to be expected.
    fn force_touch_start_to_be_expected_soon(&self) {
        self.input(InputEventType::GestureScrollUpdate, ConsumedByCompositor);
        self.input(InputEventType::GestureScrollEnd, ConsumedByCompositor);
        self.clock.advance(ms(200));
        self.scheduler.force_update_policy();
    }

    fn snapshot(&self) -> crate::policy::types::PolicySnapshot {
        self.scheduler.snapshot()
    }
}

fn setup_with(config: SchedulerConfig) -> Fixture {
    let clock = SimulatedClock::new(TimeTicks::from_micros(5000));
    let scheduler = RendererScheduler::new(Arc::new(clock.clone()), &config);
    Fixture {
        clock,
        scheduler,
        run_order: Arc::new(Mutex::new(Vec::new())),
    }
}

fn setup() -> Fixture {
    setup_with(SchedulerConfig::default())
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn labels(expected: &[&str]) -> Vec<String> {
    expected.iter().map(|s| s.to_string()).collect()
}

/// Posts to `target` from inside a default-queue task, recording whether
/// the scheduler asked to yield before and after the post.
fn post_yielding_task(f: &Fixture, target: TaskQueue) -> Arc<Mutex<(bool, bool)>> {
    let result = Arc::new(Mutex::new((false, false)));
    let recorded = Arc::clone(&result);
    let scheduler = Arc::downgrade(&f.scheduler);
    f.scheduler.default_task_queue().post_task(move || {
        let Some(scheduler) = scheduler.upgrade() else {
            return;
        };
        let before = scheduler.should_yield_for_high_priority_work();
        target.post_task(|| {});
        let after = scheduler.should_yield_for_high_priority_work();
        *recorded.lock().unwrap() = (before, after);
    });
    result
}

// ── Default ordering ────────────────────────────────────────────────

#[test]
fn default_policy_runs_in_posting_order_with_idle_last() {
    let f = setup();
    f.post_test_tasks("L1 D1 C1 D2 C2 I1");
    f.enable_idle_tasks();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1", "D1", "C1", "D2", "C2", "I1"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::None);
}

#[test]
fn idle_tasks_wait_for_a_frame() {
    let f = setup();
    f.post_test_tasks("I1 D1");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1"]));

    f.enable_idle_tasks();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1", "I1"]));
}

// ── Compositor priority ─────────────────────────────────────────────

#[test]
fn compositor_gesture_lets_other_work_run_first() {
    let f = setup();
    f.post_test_tasks("L1 D1 C1 D2 C2 I1");
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.enable_idle_tasks();
    f.simulate_compositor_gesture_start(true);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1", "D1", "D2", "C1", "C2", "I1"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::CompositorGesture);
    assert_eq!(
        f.scheduler.compositor_task_queue().queue_priority(),
        Some(QueuePriority::BestEffort)
    );
}

#[test]
fn long_compositor_gesture_prioritizes_compositor() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.enable_idle_tasks();
    f.simulate_compositor_gesture_start(true);

    // Keep the gesture going for twice the median gesture duration.
    for _ in 0..(600 / 16) {
        f.clock.advance(ms(16));
        f.input(InputEventType::TouchMove, ConsumedByCompositor);
    }

    f.post_test_tasks("L1 I1 D1 C1 D2 C2");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "C2", "L1", "D1", "D2"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::CompositorGesture);
}

#[test]
fn animate_for_input_holds_compositor_gesture() {
    let f = setup();
    f.post_test_tasks("I1 D1 C1 D2 C2");
    f.scheduler.did_animate_for_input_on_compositor_thread();
    // Animating alone never schedules a policy update.
    assert_eq!(f.scheduler.current_use_case(), UseCase::None);
    f.scheduler.force_update_policy();
    assert_eq!(f.scheduler.current_use_case(), UseCase::CompositorGesture);

    f.enable_idle_tasks();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1", "D2", "I1", "C1", "C2"]));
}

#[test]
fn main_thread_input_without_scroll_prioritizes_compositor() {
    let f = setup();
    f.post_test_tasks("L1 D1 C1 D2 C2 I1");
    f.enable_idle_tasks();
    f.input(InputEventType::TouchStart, ForwardedToMainThread);
    f.input(InputEventType::TouchMove, ForwardedToMainThread);
    f.input(InputEventType::TouchMove, ForwardedToMainThread);
    f.input(InputEventType::GestureScrollBegin, ForwardedToMainThread);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "C2", "L1", "D1", "D2", "I1"]));
    assert_eq!(
        f.scheduler.current_use_case(),
        UseCase::MainThreadCustomInputHandling
    );
}

#[test]
fn main_thread_gesture_raises_compositor_priority() {
    let f = setup();
    f.simulate_main_thread_gesture_start(Some(InputEventType::GestureScrollUpdate));
    f.run_until_idle();
    assert_eq!(f.scheduler.current_use_case(), UseCase::MainThreadGesture);
    assert_eq!(
        f.scheduler.compositor_task_queue().queue_priority(),
        Some(QueuePriority::High)
    );
}

#[test]
fn slow_synchronized_compositing_keeps_compositor_normal() {
    let f = setup();
    let args = BeginFrameArgs::new(f.clock.now(), ms(16)).on_critical_path(true);
    f.scheduler.will_begin_frame(&args);

    // 15ms of main-thread compositing leaves 1ms of a 16ms frame.
    let clock = f.clock.clone();
    let scheduler = Arc::downgrade(&f.scheduler);
    f.scheduler.compositor_task_queue().post_task(move || {
        clock.advance(ms(15));
        if let Some(scheduler) = scheduler.upgrade() {
            scheduler.did_commit_frame_to_compositor();
        }
    });
    f.simulate_compositor_gesture_start(false);
    f.run_until_idle();
    f.scheduler.force_update_policy();

    assert_eq!(f.scheduler.current_use_case(), UseCase::SynchronizedGesture);
    assert_eq!(
        f.scheduler.compositor_task_queue().queue_priority(),
        Some(QueuePriority::Normal)
    );
}

#[test]
fn compositor_priority_does_not_starve_default_work() {
    let f = setup();
    f.post_test_tasks("D1 C1");
    for _ in 0..20 {
        f.scheduler.compositor_task_queue().post_task(|| {});
    }
    f.post_test_tasks("C2");
    f.input(InputEventType::GestureFlingStart, ForwardedToMainThread);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "D1", "C2"]));
}

// ── Touchstart ──────────────────────────────────────────────────────

#[test]
fn touchstart_defers_loading_and_timers() {
    let f = setup();
    f.post_test_tasks("L1 T1 D1 C1 D2 C2 T2");
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "C2", "D1", "D2"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::Touchstart);
    assert_eq!(f.scheduler.rail_mode(), RailMode::Response);

    // Animation and meta events keep the touchstart policy.
    f.clear_run_order();
    f.scheduler.did_animate_for_input_on_compositor_thread();
    f.input(InputEventType::GestureFlingCancel, ConsumedByCompositor);
    f.input(InputEventType::GestureTapDown, ConsumedByCompositor);
    f.run_until_idle();
    assert!(f.run_order().is_empty());

    // A real gesture event releases the deferred queues.
    f.input(InputEventType::GestureScrollBegin, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1", "T1", "T2"]));
}

#[test]
fn touchstart_policy_expires() {
    let f = setup();
    f.post_test_tasks("L1 D1 C1 D2 C2");
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "C2", "D1", "D2"]));

    f.clear_run_order();
    f.clock.advance(ms(1000));
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::None);
}

#[test]
fn second_touchmove_ends_touchstart() {
    let f = setup();
    f.post_test_tasks("L1 D1 C1 D2 C2");
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.input(InputEventType::TouchMove, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["C1", "C2", "D1", "D2"]));
    assert_eq!(f.scheduler.current_use_case(), UseCase::Touchstart);

    f.clear_run_order();
    f.input(InputEventType::TouchMove, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1"]));
    assert_ne!(f.scheduler.current_use_case(), UseCase::Touchstart);
}

#[test]
fn new_loading_queue_adopts_current_policy() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.run_until_idle();
    let queue = f.scheduler.new_loading_task_queue("frame_loading_tq");
    assert!(!queue.is_queue_enabled());

    f.clock.advance(ms(1000));
    f.run_until_idle();
    assert!(queue.is_queue_enabled());
}

// ── Policy update scheduling ────────────────────────────────────────

#[test]
fn one_input_event_schedules_one_update() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    assert_eq!(f.snapshot().policy_update_count, 0);
    f.run_until_idle();
    assert_eq!(f.snapshot().policy_update_count, 1);
}

#[test]
fn burst_of_input_events_schedules_one_update() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.input(InputEventType::TouchMove, ConsumedByCompositor);
    f.input(InputEventType::TouchMove, ConsumedByCompositor);
    f.run_until_idle();
    assert_eq!(f.snapshot().policy_update_count, 1);

    // The expiring gesture policy revisits itself once.
    f.clock.advance(ms(1000));
    f.run_until_idle();
    assert_eq!(f.snapshot().policy_update_count, 2);
}

#[test]
fn yield_query_applies_pending_update() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    assert!(f.scheduler.should_yield_for_high_priority_work());
    assert_eq!(f.snapshot().policy_update_count, 1);
    assert_eq!(f.scheduler.current_use_case(), UseCase::Touchstart);
}

// ── Yielding hints ──────────────────────────────────────────────────

#[test]
fn no_yield_without_input() {
    let f = setup();
    let default_result = post_yielding_task(&f, f.scheduler.default_task_queue().clone());
    let compositor_result = post_yielding_task(&f, f.scheduler.compositor_task_queue().clone());
    f.run_until_idle();
    assert_eq!(*default_result.lock().unwrap(), (false, false));
    assert_eq!(*compositor_result.lock().unwrap(), (false, false));
}

#[test]
fn main_thread_gesture_yields_to_compositor_work() {
    let f = setup();
    f.simulate_main_thread_gesture_start(Some(InputEventType::GestureScrollUpdate));
    let result = post_yielding_task(&f, f.scheduler.compositor_task_queue().clone());
    f.run_until_idle();
    assert_eq!(*result.lock().unwrap(), (false, true));
}

#[test]
fn touchstart_always_yields() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    let result = post_yielding_task(&f, f.scheduler.default_task_queue().clone());
    f.run_until_idle();
    assert_eq!(*result.lock().unwrap(), (true, true));
}

#[test]
fn high_priority_work_anticipated_after_scroll() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.input(InputEventType::GestureScrollBegin, ConsumedByCompositor);
    f.input(InputEventType::GestureScrollEnd, ConsumedByCompositor);
    assert!(f.scheduler.is_high_priority_work_anticipated());

    f.run_for_period(ms(200));
    assert!(f.scheduler.is_high_priority_work_anticipated());

    f.run_for_period(ms(4000));
    assert!(!f.scheduler.is_high_priority_work_anticipated());
}

// ── Estimates ───────────────────────────────────────────────────────

#[test]
fn jank_free_budget_is_rail_response_without_gesture() {
    let f = setup();
    assert_eq!(f.scheduler.estimate_longest_jank_free_task_duration(), ms(50));
}

#[test]
fn jank_free_budget_is_rail_response_during_compositor_gesture() {
    let f = setup();
    f.simulate_compositor_gesture_start(false);
    f.run_until_idle();
    assert_eq!(f.scheduler.current_use_case(), UseCase::CompositorGesture);
    assert_eq!(f.scheduler.estimate_longest_jank_free_task_duration(), ms(50));
}

#[test]
fn jank_free_budget_is_frame_idle_time_during_main_thread_gesture() {
    let f = setup();
    f.simulate_main_thread_gesture_start(Some(InputEventType::GestureScrollUpdate));
    let clock = f.clock.clone();
    let scheduler = Arc::downgrade(&f.scheduler);
    f.scheduler.compositor_task_queue().post_task(move || {
        clock.advance(ms(5));
        if let Some(scheduler) = scheduler.upgrade() {
            scheduler.did_commit_frame_to_compositor();
        }
    });
    f.run_until_idle();
    assert_eq!(f.scheduler.current_use_case(), UseCase::MainThreadGesture);
    assert_eq!(f.scheduler.estimate_longest_jank_free_task_duration(), ms(11));
}

// ── Expensive tasks ─────────────────────────────────────────────────

#[test]
fn expensive_timers_throttled_during_main_thread_gesture() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.simulate_expensive_timer_tasks();
    f.do_main_frame();
    f.simulate_main_thread_gesture_start(Some(InputEventType::GestureScrollUpdate));
    f.post_test_tasks("C1 T1");
    f.run_until_idle();

    let snapshot = f.snapshot();
    assert!(!snapshot.touchstart_expected_soon);
    assert_eq!(snapshot.use_case, UseCase::MainThreadGesture);
    assert!(snapshot.timer_tasks_seem_expensive);
    assert_eq!(snapshot.expensive_task_policy, ExpensiveTaskPolicy::Throttle);
    assert_eq!(f.run_order(), labels(&["C1"]));
}

#[test]
fn expensive_timers_run_during_custom_input_handling() {
    let f = setup();
    f.simulate_expensive_timer_tasks();
    f.do_main_frame();
    f.simulate_main_thread_gesture_start(None);
    f.post_test_tasks("C1 T1");
    f.run_until_idle();

    assert_eq!(
        f.scheduler.current_use_case(),
        UseCase::MainThreadCustomInputHandling
    );
    assert_eq!(f.snapshot().expensive_task_policy, ExpensiveTaskPolicy::Run);
    assert_eq!(f.run_order(), labels(&["C1", "T1"]));
}

#[test]
fn expensive_timers_blocked_when_touchstart_expected() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.do_main_frame();
    f.simulate_expensive_timer_tasks();
    f.force_touch_start_to_be_expected_soon();
    f.scheduler.did_animate_for_input_on_compositor_thread();
    f.post_test_tasks("T1 D1");
    f.run_until_idle();

    let snapshot = f.snapshot();
    assert_eq!(snapshot.use_case, UseCase::CompositorGesture);
    assert!(snapshot.have_seen_a_begin_main_frame);
    assert!(!snapshot.loading_tasks_seem_expensive);
    assert!(snapshot.timer_tasks_seem_expensive);
    assert!(snapshot.touchstart_expected_soon);
    assert_eq!(snapshot.expensive_task_policy, ExpensiveTaskPolicy::Block);
    assert_eq!(f.run_order(), labels(&["D1"]));
}

#[test]
fn expensive_timers_not_blocked_before_first_frame() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.simulate_expensive_timer_tasks();
    f.force_touch_start_to_be_expected_soon();
    f.post_test_tasks("T1 D1");
    f.run_until_idle();

    let snapshot = f.snapshot();
    assert!(snapshot.touchstart_expected_soon);
    assert_eq!(snapshot.expensive_task_policy, ExpensiveTaskPolicy::Run);
    assert_eq!(f.run_order(), labels(&["T1", "D1"]));
}

#[test]
fn expensive_timers_not_blocked_during_pending_navigation() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.do_main_frame();
    f.simulate_expensive_timer_tasks();
    f.scheduler
        .add_pending_navigation(NavigatingFrameType::MainFrame);
    f.scheduler
        .add_pending_navigation(NavigatingFrameType::ChildFrame);
    assert_eq!(f.snapshot().navigation_task_expected_count, 1);
    f.force_touch_start_to_be_expected_soon();
    f.post_test_tasks("T1 D1");
    f.run_until_idle();
    assert_eq!(f.snapshot().expensive_task_policy, ExpensiveTaskPolicy::Run);
    assert_eq!(f.run_order(), labels(&["T1", "D1"]));

    f.scheduler
        .remove_pending_navigation(NavigatingFrameType::MainFrame);
    f.scheduler
        .remove_pending_navigation(NavigatingFrameType::MainFrame);
    assert_eq!(f.snapshot().navigation_task_expected_count, 0);
    assert_eq!(f.snapshot().expensive_task_policy, ExpensiveTaskPolicy::Block);
}

#[test]
fn expensive_timers_not_blocked_when_blocking_disallowed() {
    let f = setup();
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.scheduler.set_expensive_task_blocking_allowed(false);
    f.do_main_frame();
    f.simulate_expensive_timer_tasks();
    f.force_touch_start_to_be_expected_soon();
    f.post_test_tasks("T1 D1");
    f.run_until_idle();
    assert_eq!(f.snapshot().expensive_task_policy, ExpensiveTaskPolicy::Run);
    assert_eq!(f.run_order(), labels(&["T1", "D1"]));
}

/// Sets up blocked expensive timers after a touch sequence and returns the
/// reporter that saw the interventions.
fn blocked_timer_fixture() -> (Fixture, Arc<RecordingReporter>) {
    let f = setup();
    let reporter = Arc::new(RecordingReporter::default());
    f.scheduler
        .add_intervention_reporter(Arc::clone(&reporter) as Arc<dyn InterventionReporter>);
    f.scheduler.set_has_visible_render_widget_with_touch_handler(true);
    f.do_main_frame();
    f.simulate_expensive_timer_tasks();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.force_touch_start_to_be_expected_soon();
    (f, reporter)
}

#[test]
fn blocked_timer_reported_once() {
    let (f, reporter) = blocked_timer_fixture();
    f.post_test_tasks("T1 T2");
    f.run_until_idle();
    assert!(f.run_order().is_empty());
    assert_eq!(f.snapshot().expensive_task_policy, ExpensiveTaskPolicy::Block);
    assert_eq!(reporter.messages.lock().unwrap().len(), 1);

    f.scheduler.force_update_policy();
    f.run_until_idle();
    assert_eq!(reporter.messages.lock().unwrap().len(), 1);
    let blocked = f
        .scheduler
        .metrics()
        .blocked_tasks
        .get("default_timer_tq")
        .copied()
        .unwrap_or(0);
    assert!(blocked >= 2, "blocked {blocked}");
}

#[test]
fn navigation_resets_expensive_task_blocking() {
    let (f, reporter) = blocked_timer_fixture();
    f.post_test_tasks("T1 T2");
    f.run_until_idle();
    assert!(f.run_order().is_empty());

    f.scheduler.on_navigation_started();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1", "T2"]));
    let snapshot = f.snapshot();
    assert!(!snapshot.timer_tasks_seem_expensive);
    assert!(!snapshot.have_seen_a_begin_main_frame);
    assert_eq!(reporter.messages.lock().unwrap().len(), 1);
}

#[test]
fn removed_reporter_sees_nothing() {
    let f = setup();
    let reporter = Arc::new(RecordingReporter::default());
    let as_dyn = Arc::clone(&reporter) as Arc<dyn InterventionReporter>;
    f.scheduler.add_intervention_reporter(Arc::clone(&as_dyn));
    f.scheduler.remove_intervention_reporter(&as_dyn);
    f.scheduler.broadcast_intervention("deferred");
    assert!(reporter.messages.lock().unwrap().is_empty());
}

// ── Idle periods ────────────────────────────────────────────────────

#[test]
fn long_idle_period_when_no_frames_expected() {
    let f = setup();
    let deadlines = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&deadlines);
    f.scheduler
        .idle_task_runner()
        .post_idle_task(move |deadline| recorded.lock().unwrap().push(deadline));

    let now = f.clock.now();
    f.scheduler.begin_frame_not_expected_soon();
    f.run_until_idle();
    assert_eq!(*deadlines.lock().unwrap(), vec![now + ms(50)]);
    assert!(f.snapshot().begin_frame_not_expected_soon);
    assert!(f.scheduler.metrics().idle_periods_started >= 1);
}

#[test]
fn long_idle_period_waits_out_touchstart() {
    let f = setup();
    f.input(InputEventType::TouchStart, ConsumedByCompositor);
    f.run_until_idle();
    f.post_test_tasks("I1");
    f.scheduler.begin_frame_not_expected_soon();
    f.run_until_idle();
    assert!(f.run_order().is_empty());

    f.run_for_period(ms(200));
    assert_eq!(f.run_order(), labels(&["I1"]));
}

#[test]
fn frame_ends_idle_period() {
    let f = setup();
    f.enable_idle_tasks();
    assert_eq!(
        f.snapshot().idle_period_state,
        IdlePeriodState::InShortIdlePeriod
    );
    assert!(f.snapshot().in_idle_period);

    f.scheduler
        .will_begin_frame(&BeginFrameArgs::new(f.clock.now(), ms(16)));
    let snapshot = f.snapshot();
    assert_eq!(snapshot.idle_period_state, IdlePeriodState::NotInIdlePeriod);
    assert!(!snapshot.in_idle_period);
    assert!(snapshot.had_an_idle_period_recently);
}

#[test]
fn hidden_renderer_runs_idle_work_until_delay_passes() {
    let f = setup();
    let runs = Arc::new(Mutex::new(0usize));
    let first_runs = Arc::clone(&runs);
    let runner = f.scheduler.idle_task_runner();
    let repost_runner = Arc::clone(&runner);
    runner.post_idle_task(move |_| {
        *first_runs.lock().unwrap() += 1;
        let second_runs = Arc::clone(&first_runs);
        repost_runner.post_idle_task(move |_| *second_runs.lock().unwrap() += 1);
    });
    f.run_until_idle();
    assert_eq!(*runs.lock().unwrap(), 0);

    f.scheduler.set_all_render_widgets_hidden(true);
    f.run_until_idle();
    assert_eq!(*runs.lock().unwrap(), 2);

    f.clock.advance(ms(10_000) + ms(10));
    f.run_until_idle();
    assert_eq!(
        f.snapshot().idle_period_state,
        IdlePeriodState::NotInIdlePeriod
    );
    let third_runs = Arc::clone(&runs);
    runner.post_idle_task(move |_| *third_runs.lock().unwrap() += 1);
    f.run_until_idle();
    assert_eq!(*runs.lock().unwrap(), 2);
}

#[test]
fn rail_mode_follows_visibility() {
    let f = setup();
    let observer = Arc::new(RecordingRailObserver::default());
    f.scheduler
        .set_rail_mode_observer(Some(Arc::clone(&observer) as Arc<dyn RailModeObserver>));

    f.scheduler.set_all_render_widgets_hidden(true);
    assert_eq!(f.scheduler.rail_mode(), RailMode::Idle);
    f.scheduler.set_all_render_widgets_hidden(false);
    assert_eq!(f.scheduler.rail_mode(), RailMode::Animation);
    assert_eq!(
        *observer.modes.lock().unwrap(),
        vec![RailMode::Idle, RailMode::Animation]
    );
}

// ── Suspension ──────────────────────────────────────────────────────

#[test]
fn timer_suspension_is_reference_counted() {
    let f = setup();
    f.scheduler.suspend_timer_queue();
    f.scheduler.suspend_timer_queue();
    f.post_test_tasks("T1 D1");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1"]));

    f.scheduler.resume_timer_queue();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1"]));

    f.scheduler.resume_timer_queue();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1", "T1"]));
}

#[test]
fn unmatched_resume_is_ignored() {
    let f = setup();
    f.scheduler.resume_timer_queue();
    assert_eq!(f.snapshot().timer_queue_suspend_count, 0);
    f.scheduler.suspend_timer_queue();
    f.post_test_tasks("T1");
    f.run_until_idle();
    assert!(f.run_order().is_empty());
}

#[test]
fn suspended_renderer_resumes_when_foregrounded() {
    let f = setup();
    f.scheduler.on_renderer_backgrounded();
    f.post_test_tasks("D1 C1 L1 I1 T1");
    f.scheduler.suspend_renderer();
    f.enable_idle_tasks();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["D1", "C1", "I1"]));
    assert!(f.snapshot().renderer_suspended);

    f.clear_run_order();
    f.scheduler.on_renderer_foregrounded();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1", "T1"]));
    let snapshot = f.snapshot();
    assert!(!snapshot.renderer_suspended);
    assert!(!snapshot.renderer_backgrounded);
}

#[test]
fn suspend_renderer_ignored_in_foreground() {
    let f = setup();
    f.scheduler.suspend_renderer();
    f.post_test_tasks("L1 T1");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["L1", "T1"]));
    assert!(!f.snapshot().renderer_suspended);
}

#[test]
fn background_timer_suspension_after_delay() {
    let mut config = SchedulerConfig::default();
    config.renderer.timer_queue_suspension_when_backgrounded = true;
    let f = setup_with(config);
    f.scheduler.on_renderer_backgrounded();
    f.post_test_tasks("T1");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1"]));

    f.run_for_period(ms(5 * 60 * 1000) + ms(1));
    assert!(f.snapshot().timer_queue_suspended_when_backgrounded);
    f.post_test_tasks("T2");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1"]));

    f.scheduler.on_renderer_foregrounded();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1", "T2"]));
}

#[test]
fn background_timer_suspension_off_by_default() {
    let f = setup();
    f.scheduler.on_renderer_backgrounded();
    f.run_for_period(ms(5 * 60 * 1000) + ms(1));
    f.post_test_tasks("T1");
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1"]));
    assert!(!f.snapshot().timer_queue_suspended_when_backgrounded);
}

// ── Virtual time ────────────────────────────────────────────────────

#[test]
fn virtual_time_moves_every_queue() {
    let f = setup();
    let unthrottled = f.scheduler.new_unthrottled_task_queue("unthrottled_tq");
    f.scheduler.enable_virtual_time();
    let later = f.scheduler.new_timer_task_queue("frame_timer_tq");

    for queue in [
        f.scheduler.default_task_queue(),
        f.scheduler.compositor_task_queue(),
        f.scheduler.loading_task_queue(),
        f.scheduler.timer_task_queue(),
        &unthrottled,
        &later,
    ] {
        let kind = queue.time_domain().map(|d| d.kind());
        assert_eq!(kind, Some(TimeDomainKind::Virtual), "{}", queue.name());
    }
    assert!(f.snapshot().use_virtual_time);
}

#[test]
fn virtual_time_runs_delayed_timers_without_clock() {
    let f = setup();
    f.scheduler.enable_virtual_time();
    let run_order = Arc::clone(&f.run_order);
    f.scheduler.timer_task_queue().post_delayed_task(
        move || run_order.lock().unwrap().push("T1".to_string()),
        ms(1000),
    );
    let start = f.clock.now();
    f.run_until_idle();
    assert_eq!(f.run_order(), labels(&["T1"]));
    assert_eq!(f.clock.now(), start);
}

// ── Input filtering & shutdown ──────────────────────────────────────

#[test]
fn input_event_prioritization() {
    assert!(should_prioritize_input_event(&InputEvent::new(
        InputEventType::TouchStart
    )));
    assert!(should_prioritize_input_event(&InputEvent::new(
        InputEventType::MouseWheel
    )));
    assert!(should_prioritize_input_event(&InputEvent::with_left_button_down(
        InputEventType::MouseMove
    )));
    assert!(!should_prioritize_input_event(&InputEvent::new(
        InputEventType::MouseMove
    )));
    assert!(!should_prioritize_input_event(&InputEvent::with_left_button_down(
        InputEventType::MouseUp
    )));
    assert!(!should_prioritize_input_event(&InputEvent::new(
        InputEventType::KeyDown
    )));
}

#[test]
fn ignored_input_does_not_schedule_update() {
    let f = setup();
    f.input(InputEventType::MouseMove, ConsumedByCompositor);
    f.input(InputEventType::KeyDown, ForwardedToMainThread);
    f.run_until_idle();
    assert_eq!(f.snapshot().policy_update_count, 0);
    assert_eq!(f.scheduler.current_use_case(), UseCase::None);
}

#[test]
fn shutdown_stops_everything() {
    let f = setup();
    f.post_test_tasks("D1");
    f.scheduler.shutdown();
    assert!(f.scheduler.is_shutdown());
    f.run_until_idle();
    assert!(f.run_order().is_empty());
    assert!(!f.scheduler.default_task_queue().post_task(|| {}));
    assert!(!f.scheduler.should_yield_for_high_priority_work());
    f.scheduler.force_update_policy();
    assert_eq!(f.snapshot().policy_update_count, 0);
}
