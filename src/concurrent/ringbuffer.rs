//! Multi-producer single-consumer ring buffer of length-prefixed records.
//!
//! This is the command transport: every client process writes framed
//! commands into the to-driver buffer, and the driver is the single
//! consumer. The cluster log adapter reuses the same structure through
//! [`try_claim`](ManyToOneRingBuffer::try_claim) /
//! [`commit`](ManyToOneRingBuffer::commit) so events can be encoded in
//! place without an intermediate copy.

use std::ops::{Deref, DerefMut};

use crate::concurrent::AtomicBuffer;
use crate::util::bit::align;
use crate::util::{bit, BusError, IndexT, Result};

/// Layout of the metadata trailer that follows the data section of the ring
/// buffer.
pub mod buffer_descriptor {
    use crate::util::bit::{is_power_of_two, CACHE_LINE_LENGTH};
    use crate::util::BusError::IllegalArgument;
    use crate::util::{IndexT, Result};

    /// Offset in the trailer of the producer tail position.
    pub const TAIL_POSITION_OFFSET: IndexT = (CACHE_LINE_LENGTH * 2) as IndexT;

    /// Offset in the trailer of the consumer head position as last observed
    /// by producers.
    pub const HEAD_CACHE_POSITION_OFFSET: IndexT = (CACHE_LINE_LENGTH * 4) as IndexT;

    /// Offset in the trailer of the consumer head position.
    pub const HEAD_POSITION_OFFSET: IndexT = (CACHE_LINE_LENGTH * 6) as IndexT;

    /// Offset in the trailer of the correlation id counter.
    pub const CORRELATION_COUNTER_OFFSET: IndexT = (CACHE_LINE_LENGTH * 8) as IndexT;

    /// Offset in the trailer of the consumer heartbeat timestamp.
    pub const CONSUMER_HEARTBEAT_OFFSET: IndexT = (CACHE_LINE_LENGTH * 10) as IndexT;

    /// Total size of the metadata trailer.
    pub const TRAILER_LENGTH: IndexT = (CACHE_LINE_LENGTH * 12) as IndexT;

    /// Verify that a buffer capacity (excluding the trailer) is legal for
    /// use as a ring buffer.
    pub fn check_capacity(capacity: IndexT) -> Result<()> {
        if is_power_of_two(capacity) {
            Ok(())
        } else {
            Err(IllegalArgument)
        }
    }
}

/// Record framing within the ring buffer.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |R|                       Record Length                         |
/// +-+-------------------------------------------------------------+
/// |                              Type                             |
/// +---------------------------------------------------------------+
/// |                       Encoded Message                        ...
///...                                                              |
/// +---------------------------------------------------------------+
/// ```
///
/// The length field is written negative while a record is claimed; flipping
/// it positive publishes the record to the consumer.
pub mod record_descriptor {
    use std::mem::size_of;

    use crate::util::{BusError, IndexT, Result};

    /// Size of the record header.
    pub const HEADER_LENGTH: IndexT = size_of::<i32>() as IndexT * 2;

    /// Alignment of records within the buffer.
    pub const ALIGNMENT: IndexT = HEADER_LENGTH;

    /// Message type of records that pad out the end of the buffer so a
    /// record never wraps.
    pub const PADDING_MSG_TYPE_ID: i32 = -1;

    pub(super) fn make_header(length: i32, msg_type_id: i32) -> i64 {
        ((i64::from(msg_type_id) & 0xFFFF_FFFF) << 32) | (i64::from(length) & 0xFFFF_FFFF)
    }

    pub(super) fn check_msg_type_id(msg_type_id: i32) -> Result<()> {
        if msg_type_id < 1 {
            Err(BusError::IllegalArgument)
        } else {
            Ok(())
        }
    }

    /// Offset of a record's message body given the record start.
    pub fn encoded_msg_offset(record_offset: IndexT) -> IndexT {
        record_offset + HEADER_LENGTH
    }

    /// Offset of a record's length field given the record start.
    pub fn length_offset(record_offset: IndexT) -> IndexT {
        record_offset
    }

    /// Offset of a record's message type field given the record start.
    pub fn type_offset(record_offset: IndexT) -> IndexT {
        record_offset + size_of::<i32>() as IndexT
    }

    pub(super) fn record_length(header: i64) -> i32 {
        header as i32
    }

    pub(super) fn message_type_id(header: i64) -> i32 {
        (header >> 32) as i32
    }
}

/// Sentinel index returned when the buffer does not have room for a record.
const INSUFFICIENT_CAPACITY: IndexT = -2;

/// Multi-producer, single-consumer ring buffer over an atomic buffer.
pub struct ManyToOneRingBuffer<A>
where
    A: AtomicBuffer,
{
    buffer: A,
    capacity: IndexT,
    max_msg_length: IndexT,
    tail_position_index: IndexT,
    head_cache_position_index: IndexT,
    head_position_index: IndexT,
    correlation_id_counter_index: IndexT,
    consumer_heartbeat_index: IndexT,
}

impl<A> ManyToOneRingBuffer<A>
where
    A: AtomicBuffer,
{
    /// Create a ring buffer view over `buffer`. The buffer must be the data
    /// section plus trailer, with a power-of-two data capacity.
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = buffer.capacity() - buffer_descriptor::TRAILER_LENGTH;
        buffer_descriptor::check_capacity(capacity)?;
        Ok(ManyToOneRingBuffer {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
            tail_position_index: capacity + buffer_descriptor::TAIL_POSITION_OFFSET,
            head_cache_position_index: capacity + buffer_descriptor::HEAD_CACHE_POSITION_OFFSET,
            head_position_index: capacity + buffer_descriptor::HEAD_POSITION_OFFSET,
            correlation_id_counter_index: capacity + buffer_descriptor::CORRELATION_COUNTER_OFFSET,
            consumer_heartbeat_index: capacity + buffer_descriptor::CONSUMER_HEARTBEAT_OFFSET,
        })
    }

    /// Mint the next correlation identifier from the counter shared by all
    /// producers on this buffer.
    pub fn next_correlation_id(&self) -> i64 {
        // UNWRAP: Known-valid offset calculated during initialization
        self.buffer
            .get_and_add_i64(self.correlation_id_counter_index, 1)
            .unwrap()
    }

    /// Data capacity of the buffer, excluding the trailer.
    pub fn capacity(&self) -> IndexT {
        self.capacity
    }

    /// Largest message this buffer will accept.
    pub fn max_msg_length(&self) -> IndexT {
        self.max_msg_length
    }

    /// Timestamp of the last consumer heartbeat, in epoch milliseconds.
    pub fn consumer_heartbeat_time(&self) -> i64 {
        // UNWRAP: Known-valid offset calculated during initialization
        self.buffer
            .get_i64_volatile(self.consumer_heartbeat_index)
            .unwrap()
    }

    /// Record a consumer heartbeat timestamp, in epoch milliseconds. Called
    /// by the consumer side only.
    pub fn update_consumer_heartbeat_time(&mut self, now_ms: i64) {
        // UNWRAP: Known-valid offset calculated during initialization
        self.buffer
            .put_i64_ordered(self.consumer_heartbeat_index, now_ms)
            .unwrap()
    }

    /// Write a complete message into the ring buffer. Returns `Ok(false)`
    /// when the buffer does not currently have space.
    pub fn write<B>(
        &mut self,
        msg_type_id: i32,
        source: &B,
        source_index: IndexT,
        length: IndexT,
    ) -> Result<bool>
    where
        B: AtomicBuffer,
    {
        let msg_index = self.try_claim(msg_type_id, length)?;
        if msg_index == INSUFFICIENT_CAPACITY {
            return Ok(false);
        }

        // UNWRAP: `try_claim` performed bounds checking
        self.buffer
            .put_bytes(msg_index, source, source_index, length)
            .unwrap();
        self.commit(msg_index)?;
        Ok(true)
    }

    /// Claim space for a message of `length` bytes, returning the index at
    /// which to encode it, or a negative sentinel when the buffer is full.
    /// The record is invisible to the consumer until
    /// [`commit`](Self::commit) is called with the returned index.
    pub fn try_claim(&mut self, msg_type_id: i32, length: IndexT) -> Result<IndexT> {
        record_descriptor::check_msg_type_id(msg_type_id)?;
        self.check_msg_length(length)?;

        let record_len = length + record_descriptor::HEADER_LENGTH;
        let required = bit::align(record_len as usize, record_descriptor::ALIGNMENT as usize);
        let record_index = self.claim_capacity(required as IndexT)?;

        if record_index == INSUFFICIENT_CAPACITY {
            return Ok(INSUFFICIENT_CAPACITY);
        }

        // UNWRAP: `claim_capacity` performed bounds checking
        self.buffer
            .put_i64_ordered(
                record_index,
                record_descriptor::make_header(-record_len, msg_type_id),
            )
            .unwrap();

        Ok(record_descriptor::encoded_msg_offset(record_index))
    }

    /// Publish a record previously reserved with [`try_claim`](Self::try_claim),
    /// identified by the message index `try_claim` returned.
    pub fn commit(&mut self, msg_index: IndexT) -> Result<()> {
        let record_index = msg_index - record_descriptor::HEADER_LENGTH;
        self.buffer.bounds_check(record_index, record_descriptor::HEADER_LENGTH)?;

        let length = self
            .buffer
            .get_i32(record_descriptor::length_offset(record_index))?;
        if length >= 0 {
            return Err(BusError::IllegalState);
        }

        self.buffer
            .put_i32_ordered(record_descriptor::length_offset(record_index), -length)
    }

    /// Read up to `message_count_limit` messages, dispatching each to
    /// `handler` as a message type identifier and body. Consumed space is
    /// zeroed and released to producers after the batch.
    pub fn read_n<F>(&mut self, mut handler: F, message_count_limit: usize) -> Result<usize>
    where
        F: FnMut(i32, &[u8]),
    {
        let head = self.buffer.get_i64(self.head_position_index)?;
        let head_index = (head & i64::from(self.capacity - 1)) as i32;
        let contiguous_block_length = self.capacity - head_index;
        let mut messages_read = 0;
        let mut bytes_read: i32 = 0;

        let result: Result<()> = (|| {
            while bytes_read < contiguous_block_length && messages_read < message_count_limit {
                let record_index = head_index + bytes_read;
                let header = self.buffer.get_i64_volatile(record_index)?;
                let record_length = record_descriptor::record_length(header);

                // A zero or claimed (negative) length means the producer has
                // not yet committed this record
                if record_length <= 0 {
                    break;
                }

                bytes_read +=
                    align(record_length as usize, record_descriptor::ALIGNMENT as usize) as i32;

                let msg_type_id = record_descriptor::message_type_id(header);
                if msg_type_id == record_descriptor::PADDING_MSG_TYPE_ID {
                    continue;
                }

                messages_read += 1;
                let msg_start = record_descriptor::encoded_msg_offset(record_index) as usize;
                let msg_end = msg_start + (record_length - record_descriptor::HEADER_LENGTH) as usize;
                handler(msg_type_id, &self.buffer[msg_start..msg_end]);
            }
            Ok(())
        })();

        // Release consumed space whether or not the read errored part-way
        let mut cleanup = || {
            if bytes_read != 0 {
                // UNWRAP: Bounds known valid, the records were just read
                self.buffer
                    .set_memory(head_index, bytes_read as usize, 0)
                    .unwrap();
                self.buffer
                    .put_i64_ordered(self.head_position_index, head + i64::from(bytes_read))
                    .unwrap();
            }
        };
        result.map(|_| cleanup()).map_err(|e| {
            cleanup();
            e
        })?;

        Ok(messages_read)
    }

    /// Read all available messages, dispatching each to `handler`.
    pub fn read<F>(&mut self, handler: F) -> Result<usize>
    where
        F: FnMut(i32, &[u8]),
    {
        self.read_n(handler, usize::max_value())
    }

    /// Reserve `required` aligned bytes, returning the record start index or
    /// the insufficient-capacity sentinel. Inserts a padding record when the
    /// request would wrap the end of the buffer.
    fn claim_capacity(&mut self, required: IndexT) -> Result<IndexT> {
        let mask: IndexT = self.capacity - 1;

        // UNWRAP: Known-valid offset calculated during initialization
        let mut head = self
            .buffer
            .get_i64_volatile(self.head_cache_position_index)
            .unwrap();

        let mut tail: i64;
        let mut tail_index: IndexT;
        let mut padding: IndexT;
        // Braces turn this into a do-while loop
        while {
            tail = self.buffer.get_i64_volatile(self.tail_position_index)?;
            let available_capacity = self.capacity - (tail - head) as IndexT;

            if required > available_capacity {
                head = self.buffer.get_i64_volatile(self.head_position_index)?;

                if required > (self.capacity - (tail - head) as IndexT) {
                    return Ok(INSUFFICIENT_CAPACITY);
                }

                self.buffer
                    .put_i64_ordered(self.head_cache_position_index, head)?;
            }

            padding = 0;

            tail_index = (tail & i64::from(mask)) as IndexT;
            let to_buffer_end_length = self.capacity - tail_index;

            if required > to_buffer_end_length {
                let mut head_index = (head & i64::from(mask)) as IndexT;

                if required > head_index {
                    head = self.buffer.get_i64_volatile(self.head_position_index)?;
                    head_index = (head & i64::from(mask)) as IndexT;

                    if required > head_index {
                        return Ok(INSUFFICIENT_CAPACITY);
                    }

                    self.buffer
                        .put_i64_ordered(self.head_cache_position_index, head)?;
                }

                padding = to_buffer_end_length;
            }

            !self.buffer.compare_and_set_i64(
                self.tail_position_index,
                tail,
                tail + i64::from(required) + i64::from(padding),
            )?
        } {}

        if padding != 0 {
            self.buffer.put_i64_ordered(
                tail_index,
                record_descriptor::make_header(padding, record_descriptor::PADDING_MSG_TYPE_ID),
            )?;
            tail_index = 0;
        }

        Ok(tail_index)
    }

    fn check_msg_length(&self, length: IndexT) -> Result<()> {
        if length < 0 || length > self.max_msg_length {
            Err(BusError::IllegalArgument)
        } else {
            Ok(())
        }
    }
}

impl<A> Deref for ManyToOneRingBuffer<A>
where
    A: AtomicBuffer,
{
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl<A> DerefMut for ManyToOneRingBuffer<A>
where
    A: AtomicBuffer,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}
