use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::manager::lock;
use crate::task_queue::types::QueueId;
use crate::time::TimeTicks;

/// A unit of work posted to a task queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a delayed task.
///
/// Cancelled tasks are dropped without running and are ignored when the
/// manager computes its next wake-up.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A re-armable cancellation scope. Tasks posted with [`handle`](Self::handle)
/// share one flag; [`cancel`](Self::cancel) trips it and hands out a fresh
/// handle for subsequent posts.
#[derive(Debug, Default)]
pub struct CancelableGroup {
    current: Mutex<TaskHandle>,
}

impl CancelableGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> TaskHandle {
        lock(&self.current).clone()
    }

    pub fn cancel(&self) {
        let previous = std::mem::take(&mut *lock(&self.current));
        previous.cancel();
    }
}

/// Metadata handed to task observers.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub queue_id: QueueId,
    pub queue_name: Arc<str>,
    pub sequence_num: u64,
    pub enqueue_order: u64,
    pub nestable: bool,
    pub delayed_run_time: Option<TimeTicks>,
    pub posted_from: &'static Location<'static>,
}

/// Observes tasks as they run. Callbacks happen on the scheduler thread with
/// no scheduler lock held, so observers may post tasks or reconfigure queues.
pub trait TaskObserver: Send + Sync {
    fn will_process_task(&self, _task: &TaskInfo) {}
    fn did_process_task(&self, _task: &TaskInfo) {}
}

pub(crate) struct PendingTask {
    pub(crate) task: Task,
    pub(crate) posted_from: &'static Location<'static>,
    pub(crate) sequence_num: u64,
    pub(crate) enqueue_order: u64,
    pub(crate) delayed_run_time: Option<TimeTicks>,
    pub(crate) nestable: bool,
    pub(crate) handle: Option<TaskHandle>,
}

impl PendingTask {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.handle.as_ref().is_some_and(TaskHandle::is_cancelled)
    }

    pub(crate) fn info(&self, queue_id: QueueId, queue_name: &Arc<str>) -> TaskInfo {
        TaskInfo {
            queue_id,
            queue_name: Arc::clone(queue_name),
            sequence_num: self.sequence_num,
            enqueue_order: self.enqueue_order,
            nestable: self.nestable,
            delayed_run_time: self.delayed_run_time,
            posted_from: self.posted_from,
        }
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("posted_from", &self.posted_from)
            .field("sequence_num", &self.sequence_num)
            .field("enqueue_order", &self.enqueue_order)
            .field("delayed_run_time", &self.delayed_run_time)
            .field("nestable", &self.nestable)
            .finish()
    }
}

/// Heap entry for the delayed queue: earliest run time first, then post order.
pub(crate) struct DelayedTask(pub(crate) PendingTask);

impl DelayedTask {
    pub(crate) fn run_time(&self) -> TimeTicks {
        self.0.delayed_run_time.unwrap_or(TimeTicks::ZERO)
    }

    fn key(&self) -> (TimeTicks, u64) {
        (self.run_time(), self.0.sequence_num)
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so `BinaryHeap` pops the earliest task.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn pending(seq: u64, run_time: u64) -> PendingTask {
        PendingTask {
            task: Box::new(|| {}),
            posted_from: Location::caller(),
            sequence_num: seq,
            enqueue_order: seq,
            delayed_run_time: Some(TimeTicks::from_millis(run_time)),
            nestable: true,
            handle: None,
        }
    }

    #[test]
    fn delayed_heap_pops_earliest_then_oldest() {
        let mut heap = BinaryHeap::new();
        heap.push(DelayedTask(pending(1, 30)));
        heap.push(DelayedTask(pending(2, 10)));
        heap.push(DelayedTask(pending(3, 10)));
        heap.push(DelayedTask(pending(4, 20)));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|t| t.0.sequence_num)).collect();
        assert_eq!(order, vec![2, 3, 4, 1]);
    }

    #[test]
    fn cancel_group_rearms_after_cancel() {
        let group = CancelableGroup::new();
        let first = group.handle();
        assert!(!first.is_cancelled());
        group.cancel();
        assert!(first.is_cancelled());
        assert!(!group.handle().is_cancelled());
    }

    #[test]
    fn handle_cancels_shared_flag() {
        let handle = TaskHandle::new();
        let mut task = pending(1, 5);
        task.handle = Some(handle.clone());
        assert!(!task.is_cancelled());
        handle.cancel();
        assert!(task.is_cancelled());
    }
}
