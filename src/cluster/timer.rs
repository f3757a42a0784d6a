//! Deadline service feeding timer expiry events onto the log. Deadlines
//! fire in non-decreasing order; equal deadlines fire in the order they
//! were scheduled. Re-scheduling a correlation id supersedes its previous
//! deadline, and cancellation leaves a tombstone that the poll discards.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::util::Result;

/// Maximum expirations dispatched per poll
pub const TIMER_POLL_LIMIT: usize = 10;

/// Deadline queue keyed by correlation id.
pub struct TimerService {
    // (deadline, insertion order, correlation id), min-first
    entries: BinaryHeap<Reverse<(i64, u64, i64)>>,
    // correlation id -> insertion order of its live entry
    active: HashMap<i64, u64>,
    next_insertion_order: u64,
}

impl TimerService {
    /// Create an empty timer service.
    pub fn new() -> Self {
        TimerService {
            entries: BinaryHeap::new(),
            active: HashMap::new(),
            next_insertion_order: 0,
        }
    }

    /// Schedule (or re-schedule) the timer for `correlation_id` to fire at
    /// `deadline_ms`.
    pub fn schedule(&mut self, correlation_id: i64, deadline_ms: i64) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        self.active.insert(correlation_id, order);
        self.entries.push(Reverse((deadline_ms, order, correlation_id)));
    }

    /// Cancel the timer for `correlation_id`. Returns `true` when a live
    /// timer was cancelled.
    pub fn cancel_timer(&mut self, correlation_id: i64) -> bool {
        self.active.remove(&correlation_id).is_some()
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// True when no timers are scheduled
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Fire up to `limit` timers whose deadline is at or before `now_ms`,
    /// passing each correlation id to `handler`. A handler error stops the
    /// poll and propagates; the failed timer is consumed.
    pub fn poll(
        &mut self,
        now_ms: i64,
        handler: &mut dyn FnMut(i64) -> Result<()>,
        limit: usize,
    ) -> Result<usize> {
        let mut fired = 0;

        while fired < limit {
            let expired = match self.entries.peek() {
                Some(Reverse((deadline_ms, _, _))) if *deadline_ms <= now_ms => true,
                _ => false,
            };
            if !expired {
                break;
            }

            // UNWRAP: peek above proved the heap is non-empty
            let Reverse((_, order, correlation_id)) = self.entries.pop().unwrap();

            // Superseded or cancelled entries are tombstones
            if self.active.get(&correlation_id) != Some(&order) {
                continue;
            }
            self.active.remove(&correlation_id);

            handler(correlation_id)?;
            fired += 1;
        }

        Ok(fired)
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::TimerService;
    use crate::util::BusError;

    fn fired_ids(service: &mut TimerService, now_ms: i64, limit: usize) -> Vec<i64> {
        let mut ids = Vec::new();
        service
            .poll(
                now_ms,
                &mut |correlation_id| {
                    ids.push(correlation_id);
                    Ok(())
                },
                limit,
            )
            .unwrap();
        ids
    }

    #[test]
    fn deadlines_fire_in_non_decreasing_order() {
        let mut service = TimerService::new();
        service.schedule(3, 300);
        service.schedule(1, 100);
        service.schedule(2, 200);

        assert_eq!(fired_ids(&mut service, 1_000, usize::max_value()), vec![1, 2, 3]);
        assert!(service.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut service = TimerService::new();
        service.schedule(10, 100);
        service.schedule(11, 100);
        service.schedule(12, 100);

        assert_eq!(fired_ids(&mut service, 100, usize::max_value()), vec![10, 11, 12]);
    }

    #[test]
    fn unexpired_timers_stay_scheduled() {
        let mut service = TimerService::new();
        service.schedule(1, 100);
        service.schedule(2, 5_000);

        assert_eq!(fired_ids(&mut service, 100, usize::max_value()), vec![1]);
        assert_eq!(service.len(), 1);
        assert_eq!(fired_ids(&mut service, 5_000, usize::max_value()), vec![2]);
    }

    #[test]
    fn cancelled_timers_do_not_fire() {
        let mut service = TimerService::new();
        service.schedule(1, 100);
        assert!(service.cancel_timer(1));
        assert!(!service.cancel_timer(1));

        assert_eq!(fired_ids(&mut service, 1_000, usize::max_value()), Vec::<i64>::new());
    }

    #[test]
    fn reschedule_supersedes_previous_deadline() {
        let mut service = TimerService::new();
        service.schedule(1, 100);
        service.schedule(1, 500);

        assert_eq!(fired_ids(&mut service, 100, usize::max_value()), Vec::<i64>::new());
        assert_eq!(fired_ids(&mut service, 500, usize::max_value()), vec![1]);
    }

    #[test]
    fn poll_limit_bounds_expirations_per_pass() {
        let mut service = TimerService::new();
        for id in 0..5 {
            service.schedule(id, 100);
        }

        assert_eq!(fired_ids(&mut service, 100, 2), vec![0, 1]);
        assert_eq!(fired_ids(&mut service, 100, 10), vec![2, 3, 4]);
    }

    #[test]
    fn handler_error_stops_the_poll() {
        let mut service = TimerService::new();
        service.schedule(1, 100);
        service.schedule(2, 100);

        let result = service.poll(100, &mut |_| Err(BusError::UnableToAppend), 10);
        assert_eq!(result, Err(BusError::UnableToAppend));
        // The failed timer is consumed; the second remains
        assert_eq!(service.len(), 1);
    }
}
