//! Property tests for task selection across enabled and disabled queues.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use renderer_scheduler::config::ManagerConfig;
use renderer_scheduler::{SimulatedClock, TaskQueueManager, TaskQueueSpec, TimeTicks};

type RunLog = Arc<Mutex<Vec<(usize, usize)>>>;

fn manager() -> (SimulatedClock, TaskQueueManager) {
    let clock = SimulatedClock::new(TimeTicks::from_millis(1000));
    let manager = TaskQueueManager::new(Arc::new(clock.clone()), &ManagerConfig::default());
    (clock, manager)
}

/// Tasks run for each queue, in the order they were posted to it.
fn runs_by_queue(log: &RunLog, queue_count: usize) -> Vec<Vec<usize>> {
    let mut by_queue = vec![Vec::new(); queue_count];
    for &(queue, seq) in log.lock().unwrap().iter() {
        by_queue[queue].push(seq);
    }
    by_queue
}

proptest! {
    /// A disabled queue never runs anything. Once enabled, its backlog runs
    /// in post order.
    #[test]
    fn disabled_queues_never_run(
        enabled in proptest::collection::vec(any::<bool>(), 1..6),
        posts in proptest::collection::vec(0usize..6, 0..40),
    ) {
        let (_clock, manager) = manager();
        let queues: Vec<_> = enabled
            .iter()
            .enumerate()
            .map(|(i, &on)| {
                let queue = manager.new_task_queue(TaskQueueSpec::new(format!("q{i}")));
                queue.set_queue_enabled(on);
                queue
            })
            .collect();

        let log: RunLog = Arc::new(Mutex::new(Vec::new()));
        let mut posted = vec![0usize; queues.len()];
        for target in posts {
            let queue_index = target % queues.len();
            let seq = posted[queue_index];
            posted[queue_index] += 1;
            let log = Arc::clone(&log);
            queues[queue_index].post_task(move || log.lock().unwrap().push((queue_index, seq)));
        }

        manager.run_until_idle();
        let by_queue = runs_by_queue(&log, queues.len());
        for (i, runs) in by_queue.iter().enumerate() {
            if enabled[i] {
                prop_assert_eq!(runs, &(0..posted[i]).collect::<Vec<_>>());
            } else {
                prop_assert!(runs.is_empty(), "disabled queue q{} ran {:?}", i, runs);
            }
        }

        for queue in &queues {
            queue.set_queue_enabled(true);
        }
        manager.run_until_idle();
        let by_queue = runs_by_queue(&log, queues.len());
        for (i, runs) in by_queue.iter().enumerate() {
            prop_assert_eq!(runs, &(0..posted[i]).collect::<Vec<_>>());
        }
    }
}
