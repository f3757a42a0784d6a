//! Time sources for the conductor and sequencer. Timeout arithmetic uses a
//! monotonic nanosecond clock; driver heartbeats and cluster timestamps use
//! wall-clock milliseconds. Cached variants are cheap cloneable handles over
//! an atomic cell, letting a work loop read the clock once per tick (and
//! letting tests drive time by hand).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic time source in nanoseconds. The zero point is arbitrary; only
/// differences are meaningful.
pub trait NanoClock {
    /// Current monotonic time in nanoseconds
    fn nano_time(&self) -> i64;
}

/// Wall-clock time source in milliseconds since the UNIX epoch.
pub trait EpochClock {
    /// Current wall-clock time in epoch milliseconds
    fn time_ms(&self) -> i64;
}

/// Monotonic clock backed by [`Instant`], anchored at construction.
pub struct SystemNanoClock {
    origin: Instant,
}

impl SystemNanoClock {
    /// Create a clock anchored to the present moment.
    pub fn new() -> Self {
        SystemNanoClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemNanoClock {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoClock for SystemNanoClock {
    fn nano_time(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Wall clock backed by [`SystemTime`].
#[derive(Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn time_ms(&self) -> i64 {
        // UNWRAP: The system clock reads before 1970 only if badly broken
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
    }
}

/// Monotonic clock whose value is stored and advanced explicitly. Clones
/// share the underlying cell.
#[derive(Clone, Default)]
pub struct CachedNanoClock {
    time_ns: Arc<AtomicI64>,
}

impl CachedNanoClock {
    /// Create a cached clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new reading.
    pub fn update(&self, time_ns: i64) {
        self.time_ns.store(time_ns, Ordering::Release);
    }

    /// Advance the stored reading by `delta_ns`.
    pub fn advance(&self, delta_ns: i64) {
        self.time_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }
}

impl NanoClock for CachedNanoClock {
    fn nano_time(&self) -> i64 {
        self.time_ns.load(Ordering::Acquire)
    }
}

/// Wall clock whose value is stored and advanced explicitly. Clones share
/// the underlying cell.
#[derive(Clone, Default)]
pub struct CachedEpochClock {
    time_ms: Arc<AtomicI64>,
}

impl CachedEpochClock {
    /// Create a cached clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new reading.
    pub fn update(&self, time_ms: i64) {
        self.time_ms.store(time_ms, Ordering::Release);
    }

    /// Advance the stored reading by `delta_ms`.
    pub fn advance(&self, delta_ms: i64) {
        self.time_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl EpochClock for CachedEpochClock {
    fn time_ms(&self) -> i64 {
        self.time_ms.load(Ordering::Acquire)
    }
}
