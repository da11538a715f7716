//! Engine Clock
//!
//! Nanosecond timestamps and the time source abstraction used by the store.
//! The store enforces per-instance monotonicity on top of whatever source is
//! configured, so a wall-clock step backward can never reorder the log.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
/// i64 gives us ~292 years of range.
pub type Nanos = i64;

/// Conversion constants
pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Get current wall time as nanoseconds since Unix epoch.
#[inline]
pub fn now_ns() -> Nanos {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as Nanos
}

/// Manually driven clock for deterministic tests.
///
/// Never moves on its own; `set` and `advance` are the only way time passes.
#[derive(Debug, Default)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at the given time.
    pub fn starting_at(start: Nanos) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicI64::new(start),
        })
    }

    /// Current reading.
    #[inline]
    pub fn now(&self) -> Nanos {
        self.current.load(Ordering::Acquire)
    }

    /// Jump to an absolute time. Backward jumps are allowed here; the store
    /// clamps them when stamping events.
    #[inline]
    pub fn set(&self, t: Nanos) {
        self.current.store(t, Ordering::Release);
    }

    /// Move forward by a delta.
    #[inline]
    pub fn advance(&self, delta: Nanos) {
        self.current.fetch_add(delta, Ordering::AcqRel);
    }
}

/// Where the store reads time from when an event arrives unstamped.
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// System wall clock via `now_ns`.
    Wall,
    /// Shared manual clock, for tests and replay.
    Manual(Arc<ManualClock>),
}

impl TimeSource {
    /// Current reading of the configured source.
    #[inline]
    pub fn now(&self) -> Nanos {
        match self {
            TimeSource::Wall => now_ns(),
            TimeSource::Manual(clock) => clock.now(),
        }
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        TimeSource::Wall
    }
}
