//! Read-side view of the counters values file. Each counter is a 64-bit
//! cell on its own pair of cache lines; the driver allocates cells and
//! writes most of them, while clients read them atomically (and write the
//! few they own, such as subscriber positions).

use std::sync::Arc;

use crate::concurrent::AtomicBuffer;
use crate::util::bit::CACHE_LINE_LENGTH;
use crate::util::{BusError, IndexT, Result};

/// Length of a counter cell including padding
pub const COUNTER_LENGTH: IndexT = (CACHE_LINE_LENGTH * 2) as IndexT;

/// Maximum length of the opaque key of a counter
pub const MAX_KEY_LENGTH: IndexT = 112;

/// Maximum length of the label of a counter
pub const MAX_LABEL_LENGTH: IndexT = 380;

/// Sentinel counter id meaning no counter was allocated
pub const NO_ID_ALLOCATED: i32 = -1;

/// View over the counter values buffer.
pub struct CountersReader<A>
where
    A: AtomicBuffer,
{
    values: A,
}

impl<A> CountersReader<A>
where
    A: AtomicBuffer,
{
    /// Wrap the counter values buffer.
    pub fn new(values: A) -> Self {
        CountersReader { values }
    }

    /// Largest counter id this buffer can hold.
    pub fn max_counter_id(&self) -> i32 {
        (self.values.capacity() / COUNTER_LENGTH) - 1
    }

    /// Volatile read of a counter's value.
    pub fn counter_value(&self, counter_id: i32) -> Result<i64> {
        self.values.get_i64_volatile(self.counter_offset(counter_id)?)
    }

    /// Ordered write of a counter's value. Only the party owning the cell
    /// may write it.
    pub fn set_counter_value(&self, counter_id: i32, value: i64) -> Result<()> {
        self.values.put_i64_atomic(self.counter_offset(counter_id)?, value)
    }

    fn counter_offset(&self, counter_id: i32) -> Result<IndexT> {
        if counter_id < 0 || counter_id > self.max_counter_id() {
            Err(BusError::IllegalArgument)
        } else {
            Ok(counter_id * COUNTER_LENGTH)
        }
    }
}

/// Handle on a single counter cell, readable and writable without holding
/// the client lock. Publications expose their position this way; images
/// expose their subscriber position.
pub struct Position<A>
where
    A: AtomicBuffer,
{
    counters: Arc<CountersReader<A>>,
    counter_id: i32,
}

impl<A> Position<A>
where
    A: AtomicBuffer,
{
    /// Bind a position to a counter cell.
    pub fn new(counters: Arc<CountersReader<A>>, counter_id: i32) -> Self {
        Position {
            counters,
            counter_id,
        }
    }

    /// Counter id backing this position
    pub fn counter_id(&self) -> i32 {
        self.counter_id
    }

    /// Volatile read of the position
    pub fn get(&self) -> Result<i64> {
        self.counters.counter_value(self.counter_id)
    }

    /// Ordered write of the position. Only the owning party calls this.
    pub fn set_ordered(&self, value: i64) -> Result<()> {
        self.counters.set_counter_value(self.counter_id, value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CountersReader, Position, COUNTER_LENGTH};

    #[test]
    fn counter_cells_are_independent() {
        let reader = CountersReader::new(vec![0u8; 4 * COUNTER_LENGTH as usize]);
        reader.set_counter_value(0, 100).unwrap();
        reader.set_counter_value(3, 300).unwrap();

        assert_eq!(reader.counter_value(0), Ok(100));
        assert_eq!(reader.counter_value(1), Ok(0));
        assert_eq!(reader.counter_value(3), Ok(300));
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let reader = CountersReader::new(vec![0u8; 2 * COUNTER_LENGTH as usize]);
        assert!(reader.counter_value(-1).is_err());
        assert!(reader.counter_value(2).is_err());
    }

    #[test]
    fn positions_share_the_values_buffer() {
        let reader = Arc::new(CountersReader::new(vec![0u8; 4 * COUNTER_LENGTH as usize]));
        let position = Position::new(Arc::clone(&reader), 2);

        position.set_ordered(777).unwrap();
        assert_eq!(reader.counter_value(2), Ok(777));
        assert_eq!(position.get(), Ok(777));
    }
}
