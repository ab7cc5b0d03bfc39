use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// The narrow platform interface the runtime reads physical time through.
///
/// Implementations report nanoseconds elapsed since the clock's origin; the
/// scheduler aligns that origin with the origin of logical time at startup.
pub trait Clock: Send + Sync + 'static {
    fn physical_now(&self) -> i64;
}

/// Wall-clock time from a monotonic [`Instant`] fixed at construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn physical_now(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn starting_at(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn physical_now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
