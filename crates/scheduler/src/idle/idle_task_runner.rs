use std::panic::Location;
use std::sync::{Arc, Weak};

use crate::task_queue::TaskQueue;
use crate::time::TimeTicks;

/// An idle task receives the deadline of the idle period it runs in.
pub type IdleTask = Box<dyn FnOnce(TimeTicks) + Send + 'static>;

/// Hooks the idle task runner calls around posting and running idle tasks.
pub trait IdleTaskRunnerDelegate: Send + Sync {
    /// Called before the task is queued. May be called from any thread.
    fn on_idle_task_posted(&self);

    /// Returns the deadline handed to the idle task about to run.
    fn will_process_idle_task(&self) -> TimeTicks;

    fn did_process_idle_task(&self);
}

/// Posting surface for idle tasks. Tasks land on the idle queue, which only
/// runs inside idle periods.
pub struct IdleTaskRunner {
    idle_queue: TaskQueue,
    after_wakeup_queue: TaskQueue,
    delegate: Weak<dyn IdleTaskRunnerDelegate>,
}

impl IdleTaskRunner {
    pub fn new(
        idle_queue: TaskQueue,
        after_wakeup_queue: TaskQueue,
        delegate: Weak<dyn IdleTaskRunnerDelegate>,
    ) -> Self {
        Self {
            idle_queue,
            after_wakeup_queue,
            delegate,
        }
    }

    #[track_caller]
    pub fn post_idle_task<F>(&self, task: F) -> bool
    where
        F: FnOnce(TimeTicks) + Send + 'static,
    {
        self.post_idle(Box::new(task), true, Location::caller())
    }

    /// Post an idle task that never runs inside a nested run loop.
    #[track_caller]
    pub fn post_non_nestable_idle_task<F>(&self, task: F) -> bool
    where
        F: FnOnce(TimeTicks) + Send + 'static,
    {
        self.post_idle(Box::new(task), false, Location::caller())
    }

    /// Post an idle task that is only handed to the idle queue once some
    /// other task has woken the scheduler, so it cannot trigger an idle
    /// period on its own.
    #[track_caller]
    pub fn post_idle_task_after_wakeup<F>(self: &Arc<Self>, task: F) -> bool
    where
        F: FnOnce(TimeTicks) + Send + 'static,
    {
        let location = Location::caller();
        let runner = Arc::downgrade(self);
        let task: IdleTask = Box::new(task);
        self.after_wakeup_queue.post_from(
            Box::new(move || {
                if let Some(runner) = runner.upgrade() {
                    runner.post_idle(task, true, location);
                }
            }),
            true,
            location,
        )
    }

    pub fn runs_tasks_on_current_thread(&self) -> bool {
        self.idle_queue.runs_tasks_on_current_thread()
    }

    fn post_idle(&self, task: IdleTask, nestable: bool, location: &'static Location<'static>) -> bool {
        let Some(delegate) = self.delegate.upgrade() else {
            return false;
        };
        delegate.on_idle_task_posted();
        let delegate = Arc::downgrade(&delegate);
        self.idle_queue.post_from(
            Box::new(move || run_idle_task(&delegate, task)),
            nestable,
            location,
        )
    }
}

fn run_idle_task(delegate: &Weak<dyn IdleTaskRunnerDelegate>, task: IdleTask) {
    let Some(delegate) = delegate.upgrade() else {
        return;
    };
    let deadline = delegate.will_process_idle_task();
    task(deadline);
    delegate.did_process_idle_task();
}
