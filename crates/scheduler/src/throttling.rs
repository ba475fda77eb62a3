//! Timer throttling.
//!
//! Throttled queues move onto a [`ThrottledTimeDomain`], switch to manual
//! pumping and are disabled. Their work only becomes runnable when
//! [`ThrottlingHelper`] pumps them, which it does at most once per aligned
//! tick, so wake-ups from many queues collapse onto shared boundaries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::config::ThrottlingConfig;
use crate::helper::SchedulerHelper;
use crate::manager::lock;
use crate::task_queue::{CancelableGroup, PumpPolicy, QueueId, TaskQueue};
use crate::time::TimeTicks;
use crate::time_domain::{ThrottledTimeDomain, TimeDomain, TimeDomainObserver};

/// Round `t` up to the next multiple of `alignment` past the clock origin.
/// A time already on a boundary moves to the following one.
pub fn throttled_run_time(t: TimeTicks, alignment: Duration) -> TimeTicks {
    let alignment_us = u64::try_from(alignment.as_micros())
        .unwrap_or(u64::MAX)
        .max(1);
    let remainder = t.as_micros() % alignment_us;
    t + Duration::from_micros(alignment_us - remainder)
}

struct Metadata {
    queue: TaskQueue,
    ref_count: usize,
    /// The enablement the queue should have when not held back by throttling.
    enabled: bool,
}

#[derive(Default)]
struct ThrottlingState {
    throttled: BTreeMap<QueueId, Metadata>,
    pending_pump_run_time: Option<TimeTicks>,
    virtual_time: bool,
}

pub struct ThrottlingHelper {
    helper: SchedulerHelper,
    time_domain: Arc<ThrottledTimeDomain>,
    alignment: Duration,
    state: Mutex<ThrottlingState>,
    pump_throttled_tasks: CancelableGroup,
    weak_self: Weak<ThrottlingHelper>,
}

impl ThrottlingHelper {
    /// Create the throttled time domain, register it with the manager and
    /// subscribe to its work notifications.
    pub fn new(helper: SchedulerHelper, config: &ThrottlingConfig) -> Arc<Self> {
        let time_domain = Arc::new(ThrottledTimeDomain::new(helper.clock()));
        helper.register_time_domain(Arc::clone(&time_domain) as Arc<dyn TimeDomain>);

        let this = Arc::new_cyclic(|weak| ThrottlingHelper {
            helper,
            time_domain,
            alignment: config.alignment(),
            state: Mutex::new(ThrottlingState::default()),
            pump_throttled_tasks: CancelableGroup::new(),
            weak_self: weak.clone(),
        });
        let observer: Weak<dyn TimeDomainObserver> = this.weak_self.clone();
        this.time_domain.set_observer(observer);
        info!(alignment_ms = u64::try_from(this.alignment.as_millis()).unwrap_or(u64::MAX), "throttling helper initialized");
        this
    }

    pub fn time_domain(&self) -> Arc<dyn TimeDomain> {
        Arc::clone(&self.time_domain) as Arc<dyn TimeDomain>
    }

    pub fn alignment(&self) -> Duration {
        self.alignment
    }

    pub fn is_throttled(&self, queue: &TaskQueue) -> bool {
        lock(&self.state).throttled.contains_key(&queue.id())
    }

    /// Enable or disable `queue`. A throttled queue only records the
    /// request; enabling waits for the next pump, disabling applies now.
    pub fn set_queue_enabled(&self, queue: &TaskQueue, enabled: bool) {
        let throttled = {
            let mut state = lock(&self.state);
            match state.throttled.get_mut(&queue.id()) {
                Some(entry) => {
                    entry.enabled = enabled;
                    true
                }
                None => false,
            }
        };
        if !throttled || !enabled {
            queue.set_queue_enabled(enabled);
        }
    }

    pub fn increase_throttle_ref_count(&self, queue: &TaskQueue) {
        let first = {
            let mut state = lock(&self.state);
            if state.virtual_time {
                return;
            }
            match state.throttled.get_mut(&queue.id()) {
                Some(entry) => {
                    entry.ref_count += 1;
                    false
                }
                None => {
                    state.throttled.insert(
                        queue.id(),
                        Metadata {
                            queue: queue.clone(),
                            ref_count: 1,
                            enabled: queue.is_queue_enabled(),
                        },
                    );
                    true
                }
            }
        };
        if !first {
            return;
        }

        debug!(queue = queue.name(), "queue throttled");
        queue.set_time_domain(self.time_domain());
        queue.set_pump_policy(PumpPolicy::Manual);
        queue.set_queue_enabled(false);
        if !queue.is_empty() {
            if queue.has_pending_immediate_work() {
                self.on_time_domain_has_immediate_work();
            } else {
                self.on_time_domain_has_delayed_work();
            }
        }
    }

    pub fn decrease_throttle_ref_count(&self, queue: &TaskQueue) {
        let restore = {
            let mut state = lock(&self.state);
            if state.virtual_time {
                return;
            }
            let Some(entry) = state.throttled.get_mut(&queue.id()) else {
                return;
            };
            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                return;
            }
            state.throttled.remove(&queue.id())
        };
        if let Some(entry) = restore {
            debug!(queue = queue.name(), "queue unthrottled");
            self.restore(&entry.queue, self.helper.real_time_domain(), entry.enabled);
        }
    }

    /// Forget `queue`, returning it to the real time domain first so it is
    /// not left disabled on manual pumping.
    pub fn unregister_task_queue(&self, queue: &TaskQueue) {
        let removed = lock(&self.state).throttled.remove(&queue.id());
        if let Some(entry) = removed {
            self.restore(&entry.queue, self.helper.real_time_domain(), entry.enabled);
        }
    }

    /// Move every throttled queue onto `domain` and make further throttle
    /// requests no-ops.
    pub fn enable_virtual_time(&self, domain: Arc<dyn TimeDomain>) {
        let entries = {
            let mut state = lock(&self.state);
            state.virtual_time = true;
            state.pending_pump_run_time = None;
            std::mem::take(&mut state.throttled)
        };
        self.pump_throttled_tasks.cancel();
        for entry in entries.into_values() {
            self.restore(&entry.queue, Arc::clone(&domain), entry.enabled);
        }
        info!("throttling disabled for virtual time");
    }

    fn restore(&self, queue: &TaskQueue, domain: Arc<dyn TimeDomain>, enabled: bool) {
        queue.set_time_domain(domain);
        queue.set_pump_policy(PumpPolicy::Auto);
        queue.set_queue_enabled(enabled);
    }

    // ── Pumping ─────────────────────────────────────────────────────

    fn pump_throttled_tasks(&self) {
        let queues: Vec<TaskQueue> = {
            let mut state = lock(&self.state);
            state.pending_pump_run_time = None;
            state
                .throttled
                .values()
                .filter(|entry| entry.enabled)
                .map(|entry| entry.queue.clone())
                .collect()
        };

        let now = self.helper.now();
        trace!(now = %now, queues = queues.len(), "pumping throttled queues");
        for queue in queues.iter().filter(|q| !q.is_empty()) {
            queue.set_queue_enabled(true);
            queue.pump_queue();
        }

        if let Some(next) = self.next_throttled_run_time() {
            self.maybe_schedule_pump(now, next);
        }
    }

    fn next_throttled_run_time(&self) -> Option<TimeTicks> {
        self.helper
            .manager()
            .next_scheduled_run_time(&self.time_domain())
    }

    /// Post a pump for the aligned tick after `max(now, unthrottled)`,
    /// unless an earlier or equal pump is already pending.
    fn maybe_schedule_pump(&self, now: TimeTicks, unthrottled: TimeTicks) {
        let run_time = throttled_run_time(now.max(unthrottled), self.alignment);
        {
            let mut state = lock(&self.state);
            if state.virtual_time {
                return;
            }
            if state.pending_pump_run_time.is_some_and(|pending| run_time >= pending) {
                return;
            }
            state.pending_pump_run_time = Some(run_time);
        }
        self.pump_throttled_tasks.cancel();

        trace!(run_time = %run_time, "scheduling throttled pump");
        let weak = self.weak_self.clone();
        let handle = self.pump_throttled_tasks.handle();
        self.helper.control_task_queue().post_task_with_handle(
            move || {
                if let Some(throttling) = weak.upgrade() {
                    throttling.pump_throttled_tasks();
                }
            },
            run_time.saturating_duration_since(now),
            &handle,
        );
    }
}

impl TimeDomainObserver for ThrottlingHelper {
    fn on_time_domain_has_immediate_work(&self) {
        if !self.helper.runs_tasks_on_current_thread() {
            let weak = self.weak_self.clone();
            self.helper.control_task_queue().post_task(move || {
                if let Some(throttling) = weak.upgrade() {
                    throttling.on_time_domain_has_immediate_work();
                }
            });
            return;
        }
        let now = self.helper.now();
        self.maybe_schedule_pump(now, now);
    }

    fn on_time_domain_has_delayed_work(&self) {
        if !self.helper.runs_tasks_on_current_thread() {
            let weak = self.weak_self.clone();
            self.helper.control_task_queue().post_task(move || {
                if let Some(throttling) = weak.upgrade() {
                    throttling.on_time_domain_has_delayed_work();
                }
            });
            return;
        }
        if let Some(next) = self.next_throttled_run_time() {
            self.maybe_schedule_pump(self.helper.now(), next);
        }
    }
}
