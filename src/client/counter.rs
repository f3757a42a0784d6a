//! Client-owned counter allocated through the driver's counters manager.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::concurrent::AtomicBuffer;
use crate::counters::Position;
use crate::util::{BusError, Result};

/// Handle on a counter cell allocated for this client.
pub struct Counter<A>
where
    A: AtomicBuffer,
{
    registration_id: i64,
    position: Position<A>,
    is_closed: AtomicBool,
}

impl<A> Counter<A>
where
    A: AtomicBuffer,
{
    pub(crate) fn new(registration_id: i64, position: Position<A>) -> Self {
        Counter {
            registration_id,
            position,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Registration id under which this counter was requested
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Id of the allocated counter cell
    pub fn counter_id(&self) -> i32 {
        self.position.counter_id()
    }

    /// Volatile read of the counter value
    pub fn get(&self) -> Result<i64> {
        if self.is_closed() {
            return Err(BusError::ClientClosed);
        }
        self.position.get()
    }

    /// Ordered write of the counter value
    pub fn set_ordered(&self, value: i64) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::ClientClosed);
        }
        self.position.set_ordered(value)
    }

    /// True once the counter has been released or force-closed
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
