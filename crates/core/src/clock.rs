//! Injected time source.
//!
//! Replaces any ambient `DateTime::now()` call (spec.md §9): production
//! code takes a `Arc<dyn Clock>`, tests supply a [`FixedClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A source of monotonic-ish UTC nanosecond timestamps.
///
/// Block `timestamp` fields (§3) are written once from this source and
/// never changed afterwards.
pub trait Clock: Send + Sync {
    /// Current time, in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// The default clock, backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    }
}

/// A deterministic clock for tests: starts at a fixed value and only
/// advances when told to.
#[derive(Debug)]
pub struct FixedClock {
    nanos: AtomicI64,
}

impl FixedClock {
    /// Create a clock fixed at `start_nanos`.
    pub fn new(start_nanos: i64) -> Arc<Self> {
        Arc::new(FixedClock {
            nanos: AtomicI64::new(start_nanos),
        })
    }

    /// Advance the clock by `delta_nanos` (may be negative in tests that
    /// simulate clock skew, though production timestamps never go
    /// backwards).
    pub fn advance(&self, delta_nanos: i64) {
        self.nanos.fetch_add(delta_nanos, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_on_demand() {
        let clock = FixedClock::new(100);
        assert_eq!(clock.now_nanos(), 100);
        clock.advance(50);
        assert_eq!(clock.now_nanos(), 150);
    }

    #[test]
    fn system_clock_returns_positive_nanos() {
        assert!(SystemClock.now_nanos() > 0);
    }
}
