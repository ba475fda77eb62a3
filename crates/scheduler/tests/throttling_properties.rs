//! Property tests for throttle reference counting and wake-up alignment.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use renderer_scheduler::config::{ManagerConfig, ThrottlingConfig};
use renderer_scheduler::throttling::throttled_run_time;
use renderer_scheduler::{
    SchedulerHelper, SimulatedClock, TaskQueueSpec, ThrottlingHelper, TimeDomainKind, TimeTicks,
};

proptest! {
    /// A queue is throttled exactly while more increases than decreases
    /// have been applied to it, and gets its enablement back afterwards.
    #[test]
    fn throttled_while_ref_count_positive(
        ops in proptest::collection::vec(any::<bool>(), 0..50),
        initially_enabled in any::<bool>(),
    ) {
        let clock = SimulatedClock::new(TimeTicks::from_millis(1000));
        let helper = SchedulerHelper::new(Arc::new(clock), &ManagerConfig::default(), "prop");
        let throttling = ThrottlingHelper::new(helper.clone(), &ThrottlingConfig::default());
        let queue = helper.new_task_queue(TaskQueueSpec::new("timer_tq"));
        queue.set_queue_enabled(initially_enabled);

        let mut ref_count = 0usize;
        for increase in ops {
            if increase {
                throttling.increase_throttle_ref_count(&queue);
                ref_count += 1;
            } else {
                throttling.decrease_throttle_ref_count(&queue);
                ref_count = ref_count.saturating_sub(1);
            }

            prop_assert_eq!(throttling.is_throttled(&queue), ref_count > 0);
            let kind = queue.time_domain().map(|domain| domain.kind());
            if ref_count > 0 {
                prop_assert_eq!(kind, Some(TimeDomainKind::Throttled));
                prop_assert!(!queue.is_queue_enabled());
            } else {
                prop_assert_eq!(kind, Some(TimeDomainKind::Real));
                prop_assert_eq!(queue.is_queue_enabled(), initially_enabled);
            }
        }
    }

    /// Throttled run times land on the next alignment boundary strictly
    /// after the requested time.
    #[test]
    fn throttled_run_time_rounds_up_to_next_boundary(
        t_us in 0u64..1_000_000_000_000,
        alignment_us in 1u64..10_000_000,
    ) {
        let alignment = Duration::from_micros(alignment_us);
        let rounded = throttled_run_time(TimeTicks::from_micros(t_us), alignment).as_micros();

        prop_assert!(rounded > t_us);
        prop_assert_eq!(rounded % alignment_us, 0);
        prop_assert!(rounded - t_us <= alignment_us);

        let again = throttled_run_time(TimeTicks::from_micros(rounded), alignment).as_micros();
        prop_assert_eq!(again, rounded + alignment_us);
    }
}

#[test]
fn one_second_alignment() {
    let second = Duration::from_secs(1);
    assert_eq!(
        throttled_run_time(TimeTicks::from_millis(1500), second),
        TimeTicks::from_millis(2000)
    );
    assert_eq!(
        throttled_run_time(TimeTicks::from_millis(2000), second),
        TimeTicks::from_millis(3000)
    );
}
