use tracing::trace;

use super::core::ManagerState;
use crate::task_queue::task::PendingTask;
use crate::task_queue::{PumpPolicy, QueueId, QueuePriority, TaskInfo, WakeupPolicy};

/// The task that ran most recently, used to decide whether `AfterWakeup`
/// queues should reload.
#[derive(Debug, Clone, Copy)]
pub(super) struct PreviousTask {
    pub(super) enqueue_order: u64,
    pub(super) wakeup_policy: WakeupPolicy,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    priority: QueuePriority,
    enqueue_order: u64,
    queue: QueueId,
}

pub(super) struct Selection {
    pub(super) chosen: Option<QueueId>,
    pub(super) blocked: Option<(QueueId, TaskInfo)>,
}

impl ManagerState {
    /// Pump every queue whose policy allows it at this point. Due delayed
    /// tasks from all pumped queues are ordered by run time before they
    /// receive enqueue orders, so a shorter delay never loses to a longer one
    /// on another queue.
    pub(super) fn reload_queues(
        &mut self,
        previous: Option<PreviousTask>,
        graveyard: &mut Vec<PendingTask>,
    ) {
        let mut pumped = Vec::new();
        let mut due = Vec::new();
        for (id, queue) in self.queues.iter_mut() {
            let should_pump = match queue.pump_policy {
                PumpPolicy::Auto => true,
                PumpPolicy::Manual => false,
                PumpPolicy::AfterWakeup => previous.is_some_and(|prev| {
                    prev.wakeup_policy == WakeupPolicy::CanWakeOtherQueues
                        && queue
                            .incoming
                            .front()
                            .map_or(true, |oldest| prev.enqueue_order > oldest.enqueue_order)
                }),
            };
            if should_pump {
                due.extend(queue.take_due_delayed(graveyard).into_iter().map(|t| (*id, t)));
                pumped.push(*id);
            }
        }

        due.sort_by_key(|(_, t)| (t.delayed_run_time, t.sequence_num));
        for (id, mut task) in due {
            task.enqueue_order = self.next_sequence_num;
            self.next_sequence_num += 1;
            if let Some(queue) = self.queues.get_mut(&id) {
                queue.work.push_back(task);
            }
        }
        for id in pumped {
            if let Some(queue) = self.queues.get_mut(&id) {
                queue.move_incoming_to_work();
            }
        }
    }

    /// Pick the queue whose front task runs next and note whether a blocked
    /// reporting queue would have won instead.
    pub(super) fn select(
        &mut self,
        max_starvation_tasks: usize,
        graveyard: &mut Vec<PendingTask>,
    ) -> Selection {
        for queue in self.queues.values_mut() {
            while queue.work.front().is_some_and(PendingTask::is_cancelled) {
                if let Some(task) = queue.work.pop_front() {
                    graveyard.push(task);
                }
            }
        }

        let enabled: Vec<Candidate> = self
            .queues
            .iter()
            .filter(|(_, q)| q.enabled)
            .filter_map(|(id, q)| {
                q.work.front().map(|t| Candidate {
                    priority: q.priority,
                    enqueue_order: t.enqueue_order,
                    queue: *id,
                })
            })
            .collect();

        let chosen = choose(&enabled, self.starvation_count, max_starvation_tasks);
        let blocked = if self.observer.is_some() {
            self.select_blocked(chosen)
        } else {
            None
        };

        if let Some(c) = chosen {
            match c.priority {
                QueuePriority::Control => {}
                QueuePriority::High => self.starvation_count += 1,
                QueuePriority::Normal | QueuePriority::Low | QueuePriority::BestEffort => {
                    self.starvation_count = 0
                }
            }
            trace!(queue = %c.queue, priority = ?c.priority, order = c.enqueue_order, "selected");
        }

        Selection {
            chosen: chosen.map(|c| c.queue),
            blocked,
        }
    }

    fn select_blocked(&self, chosen: Option<Candidate>) -> Option<(QueueId, TaskInfo)> {
        let blocked: Vec<Candidate> = self
            .queues
            .iter()
            .filter(|(_, q)| !q.enabled && q.should_report_when_execution_blocked)
            .filter_map(|(id, q)| {
                q.work.front().map(|t| Candidate {
                    priority: q.priority,
                    enqueue_order: t.enqueue_order,
                    queue: *id,
                })
            })
            .filter(|b| chosen.map_or(true, |c| b.priority <= c.priority))
            .collect();

        let winner = choose(&blocked, self.starvation_count, usize::MAX)?;
        let would_have_run = match chosen {
            None => true,
            Some(c) => {
                winner.priority < c.priority || winner.enqueue_order < c.enqueue_order
            }
        };
        if !would_have_run {
            return None;
        }
        let queue = self.queues.get(&winner.queue)?;
        let task = queue.work.front()?;
        Some((winner.queue, task.info(winner.queue, &queue.name)))
    }
}

/// Control first; then NORMAL if HIGH has starved it; otherwise highest
/// priority, oldest enqueue order.
fn choose(
    candidates: &[Candidate],
    starvation_count: usize,
    max_starvation_tasks: usize,
) -> Option<Candidate> {
    let oldest_with = |priority: QueuePriority| {
        candidates
            .iter()
            .filter(|c| c.priority == priority)
            .min_by_key(|c| c.enqueue_order)
            .copied()
    };

    if let Some(c) = oldest_with(QueuePriority::Control) {
        return Some(c);
    }
    if starvation_count >= max_starvation_tasks {
        if let Some(c) = oldest_with(QueuePriority::Normal) {
            return Some(c);
        }
    }
    candidates
        .iter()
        .min_by_key(|c| (c.priority, c.enqueue_order))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(priority: QueuePriority, order: u64, queue: u64) -> Candidate {
        Candidate {
            priority,
            enqueue_order: order,
            queue: QueueId(queue),
        }
    }

    #[test]
    fn control_wins_over_everything() {
        let c = [
            cand(QueuePriority::High, 1, 1),
            cand(QueuePriority::Control, 9, 2),
        ];
        assert_eq!(choose(&c, 0, 5).map(|c| c.queue), Some(QueueId(2)));
    }

    #[test]
    fn equal_priority_breaks_ties_by_enqueue_order() {
        let c = [
            cand(QueuePriority::Normal, 7, 1),
            cand(QueuePriority::Normal, 3, 2),
        ];
        assert_eq!(choose(&c, 0, 5).map(|c| c.queue), Some(QueueId(2)));
    }

    #[test]
    fn starved_normal_beats_high() {
        let c = [
            cand(QueuePriority::High, 1, 1),
            cand(QueuePriority::Normal, 2, 2),
        ];
        assert_eq!(choose(&c, 4, 5).map(|c| c.queue), Some(QueueId(1)));
        assert_eq!(choose(&c, 5, 5).map(|c| c.queue), Some(QueueId(2)));
    }

    #[test]
    fn starvation_does_not_promote_best_effort() {
        let c = [
            cand(QueuePriority::High, 1, 1),
            cand(QueuePriority::BestEffort, 0, 2),
        ];
        assert_eq!(choose(&c, 10, 5).map(|c| c.queue), Some(QueueId(1)));
    }
}
