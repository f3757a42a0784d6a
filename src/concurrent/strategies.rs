//! Idle strategies: how an agent thread backs off when a work cycle found
//! nothing to do. Suspension is always an explicit cooperative yield; there
//! is no blocking I/O inside a work cycle.

use std::hint;
use std::thread;
use std::time::Duration;

/// Cooperative back-off policy applied between agent work cycles.
pub trait IdleStrategy {
    /// Idle according to the number of units of work done in the last
    /// cycle. A non-zero count resets any back-off state.
    fn idle(&mut self, work_count: usize);

    /// Reset accumulated back-off state.
    fn reset(&mut self) {}
}

/// Busy-spin without yielding the CPU. Lowest latency, one core pinned.
#[derive(Default)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            hint::spin_loop();
        }
    }
}

/// Yield the thread back to the OS scheduler on every empty cycle.
#[derive(Default)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::yield_now();
        }
    }
}

/// Sleep a fixed period on every empty cycle.
pub struct SleepingIdleStrategy {
    period: Duration,
}

impl SleepingIdleStrategy {
    /// Create a strategy that sleeps `period` when there is no work.
    pub fn new(period: Duration) -> Self {
        SleepingIdleStrategy { period }
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::sleep(self.period);
        }
    }
}

const SPIN_LIMIT: u32 = 10;
const YIELD_LIMIT: u32 = 20;
const MAX_PARK_PERIOD: Duration = Duration::from_millis(1);

/// Escalating back-off: spin, then yield, then park for exponentially
/// longer periods up to one millisecond.
#[derive(Default)]
pub struct BackoffIdleStrategy {
    empty_cycles: u32,
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.empty_cycles < SPIN_LIMIT {
            hint::spin_loop();
        } else if self.empty_cycles < YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exponent = (self.empty_cycles - YIELD_LIMIT).min(10);
            let park = Duration::from_micros(1u64 << exponent).min(MAX_PARK_PERIOD);
            thread::sleep(park);
        }
        self.empty_cycles = self.empty_cycles.saturating_add(1);
    }

    fn reset(&mut self) {
        self.empty_cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{BackoffIdleStrategy, IdleStrategy};

    #[test]
    fn backoff_resets_on_work() {
        let mut strategy = BackoffIdleStrategy::default();
        for _ in 0..5 {
            strategy.idle(0);
        }
        assert_eq!(strategy.empty_cycles, 5);

        strategy.idle(3);
        assert_eq!(strategy.empty_cycles, 0);
    }
}
