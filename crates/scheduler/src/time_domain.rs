//! Time domains decide what "now" means for the queues assigned to them.
//!
//! A [`RealTimeDomain`] reads the scheduler clock, a [`VirtualTimeDomain`]
//! only moves when advanced, and a [`ThrottledTimeDomain`] reads the real
//! clock but hands wake-up decisions to an observer (the throttling helper)
//! instead of letting the manager wake for its delayed tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use crate::task_queue::QueueId;
use crate::time::{TickClock, TimeTicks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeDomainKind {
    Real,
    Throttled,
    Virtual,
}

pub trait TimeDomain: Send + Sync {
    fn name(&self) -> &str;

    fn now(&self) -> TimeTicks;

    fn kind(&self) -> TimeDomainKind;

    /// A queue in this domain received an immediate task while its incoming
    /// queue was empty. May be called from any thread.
    fn on_queue_has_immediate_work(&self, _queue: QueueId) {}

    /// A queue in this domain has a new earliest delayed task.
    fn on_queue_has_delayed_work(&self, _queue: QueueId, _run_time: TimeTicks) {}

    fn as_virtual(&self) -> Option<&VirtualTimeDomain> {
        None
    }
}

impl fmt::Debug for dyn TimeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeDomain({}, {:?})", self.name(), self.kind())
    }
}

/// Identity comparison for shared time domains.
pub fn same_domain(a: &Arc<dyn TimeDomain>, b: &Arc<dyn TimeDomain>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ── Real ────────────────────────────────────────────────────────────

pub struct RealTimeDomain {
    clock: Arc<dyn TickClock>,
}

impl RealTimeDomain {
    pub fn new(clock: Arc<dyn TickClock>) -> Self {
        Self { clock }
    }
}

impl TimeDomain for RealTimeDomain {
    fn name(&self) -> &str {
        "RealTimeDomain"
    }

    fn now(&self) -> TimeTicks {
        self.clock.now_ticks()
    }

    fn kind(&self) -> TimeDomainKind {
        TimeDomainKind::Real
    }
}

// ── Virtual ─────────────────────────────────────────────────────────

/// A timeline that only advances when told to, either explicitly or, with
/// auto-advance on, by the manager jumping to the next delayed task once
/// nothing else is runnable.
pub struct VirtualTimeDomain {
    now: AtomicU64,
    auto_advance: AtomicBool,
}

impl VirtualTimeDomain {
    pub fn new(initial: TimeTicks) -> Self {
        Self {
            now: AtomicU64::new(initial.as_micros()),
            auto_advance: AtomicBool::new(false),
        }
    }

    /// Move virtual time forward. Earlier targets are ignored.
    pub fn advance_to(&self, target: TimeTicks) {
        let prev = self.now.fetch_max(target.as_micros(), Ordering::SeqCst);
        if target.as_micros() > prev {
            debug!(now = %target, "virtual time advanced");
        }
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.auto_advance.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance.load(Ordering::SeqCst)
    }
}

impl TimeDomain for VirtualTimeDomain {
    fn name(&self) -> &str {
        "VirtualTimeDomain"
    }

    fn now(&self) -> TimeTicks {
        TimeTicks::from_micros(self.now.load(Ordering::SeqCst))
    }

    fn kind(&self) -> TimeDomainKind {
        TimeDomainKind::Virtual
    }

    fn as_virtual(&self) -> Option<&VirtualTimeDomain> {
        Some(self)
    }
}

// ── Throttled ───────────────────────────────────────────────────────

/// Receives work notifications from a [`ThrottledTimeDomain`].
pub trait TimeDomainObserver: Send + Sync {
    fn on_time_domain_has_immediate_work(&self);
    fn on_time_domain_has_delayed_work(&self);
}

pub struct ThrottledTimeDomain {
    clock: Arc<dyn TickClock>,
    observer: Mutex<Option<Weak<dyn TimeDomainObserver>>>,
}

impl ThrottledTimeDomain {
    pub fn new(clock: Arc<dyn TickClock>) -> Self {
        Self {
            clock,
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: Weak<dyn TimeDomainObserver>) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn TimeDomainObserver>> {
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl TimeDomain for ThrottledTimeDomain {
    fn name(&self) -> &str {
        "ThrottledTimeDomain"
    }

    fn now(&self) -> TimeTicks {
        self.clock.now_ticks()
    }

    fn kind(&self) -> TimeDomainKind {
        TimeDomainKind::Throttled
    }

    fn on_queue_has_immediate_work(&self, _queue: QueueId) {
        if let Some(observer) = self.observer() {
            observer.on_time_domain_has_immediate_work();
        }
    }

    fn on_queue_has_delayed_work(&self, _queue: QueueId, _run_time: TimeTicks) {
        if let Some(observer) = self.observer() {
            observer.on_time_domain_has_delayed_work();
        }
    }
}
