//! Monotonic clock source.
//!
//! All scheduler timing goes through a [`TickClock`], so the whole stack can
//! run against wall time ([`RealClock`]) or a hand-driven [`SimulatedClock`].

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point on the scheduler timeline, in microseconds since the clock origin.
///
/// `TimeTicks::ZERO` doubles as the "unset" value, mirroring how the
/// scheduler stores optional deadlines.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeTicks(u64);

impl TimeTicks {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1000)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Offset from the clock origin.
    pub fn since_origin(self) -> Duration {
        Duration::from_micros(self.0)
    }

    /// Elapsed time since `earlier`, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: TimeTicks) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Whole microseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl Add<Duration> for TimeTicks {
    type Output = TimeTicks;

    fn add(self, rhs: Duration) -> TimeTicks {
        TimeTicks(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl AddAssign<Duration> for TimeTicks {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for TimeTicks {
    type Output = TimeTicks;

    fn sub(self, rhs: Duration) -> TimeTicks {
        TimeTicks(self.0.saturating_sub(duration_micros(rhs)))
    }
}

impl Sub<TimeTicks> for TimeTicks {
    type Output = Duration;

    fn sub(self, rhs: TimeTicks) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for TimeTicks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}ms", self.0 / 1000, self.0 % 1000)
    }
}

/// Source of monotonic time for the scheduler.
pub trait TickClock: Send + Sync {
    fn now_ticks(&self) -> TimeTicks;
}

/// Wall-clock backed source. The origin is the moment of construction.
#[derive(Debug, Clone)]
pub struct RealClock {
    origin: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickClock for RealClock {
    fn now_ticks(&self) -> TimeTicks {
        // Start at 1us so a real reading is never mistaken for "unset".
        TimeTicks(duration_micros(self.origin.elapsed()).saturating_add(1))
    }
}

/// Hand-driven clock for tests and simulations. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new(start: TimeTicks) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start.0)),
        }
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.now.fetch_add(duration_micros(delta), Ordering::SeqCst);
    }

    /// Move time forward to `target`. Never moves backwards.
    pub fn advance_to(&self, target: TimeTicks) {
        self.now.fetch_max(target.0, Ordering::SeqCst);
    }

    pub fn now(&self) -> TimeTicks {
        TimeTicks(self.now.load(Ordering::SeqCst))
    }
}

impl TickClock for SimulatedClock {
    fn now_ticks(&self) -> TimeTicks {
        self.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_arithmetic_saturates() {
        let t = TimeTicks::from_millis(5);
        assert_eq!(t + Duration::from_millis(10), TimeTicks::from_millis(15));
        assert_eq!(t - Duration::from_millis(10), TimeTicks::ZERO);
        assert_eq!(TimeTicks::from_millis(3) - t, Duration::ZERO);
        assert_eq!(t - TimeTicks::from_millis(2), Duration::from_millis(3));
    }

    #[test]
    fn simulated_clock_only_moves_forward() {
        let clock = SimulatedClock::new(TimeTicks::from_millis(5));
        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now(), TimeTicks::from_millis(15));

        clock.advance_to(TimeTicks::from_millis(1));
        assert_eq!(clock.now(), TimeTicks::from_millis(15));

        let shared = clock.clone();
        shared.advance_to(TimeTicks::from_millis(40));
        assert_eq!(clock.now_ticks(), TimeTicks::from_millis(40));
    }

    #[test]
    fn real_clock_is_never_zero() {
        let clock = RealClock::new();
        assert!(!clock.now_ticks().is_zero());
    }

    #[test]
    fn duration_micros_saturates() {
        assert_eq!(duration_micros(Duration::from_micros(1500)), 1500);
        assert_eq!(duration_micros(Duration::MAX), u64::MAX);
    }

    #[test]
    fn display_formats_millis() {
        assert_eq!(TimeTicks::from_micros(2_300_500).to_string(), "2300.500ms");
    }
}
