//! One-to-many broadcast buffer, the events transport. The driver transmits
//! each event to every connected client; a slow client does not apply back
//! pressure, it simply gets lapped and loses records.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::concurrent::AtomicBuffer;
use crate::util::bit::align;
use crate::util::{BusError, IndexT, Result};

/// Layout of the metadata trailer that follows the data section of the
/// broadcast buffer.
pub mod buffer_descriptor {
    use std::mem::size_of;

    use crate::util::bit::{is_power_of_two, CACHE_LINE_LENGTH};
    use crate::util::{BusError, IndexT, Result};

    /// Offset within the trailer of the tail intent counter, signalled
    /// before a record is written.
    pub const TAIL_INTENT_COUNTER_OFFSET: IndexT = 0;

    /// Offset within the trailer of the tail counter, advanced after a
    /// record is complete.
    pub const TAIL_COUNTER_OFFSET: IndexT = TAIL_INTENT_COUNTER_OFFSET + size_of::<i64>() as IndexT;

    /// Offset within the trailer of the cursor of the most recent complete
    /// record.
    pub const LATEST_COUNTER_OFFSET: IndexT = TAIL_COUNTER_OFFSET + size_of::<i64>() as IndexT;

    /// Size of the broadcast buffer metadata trailer
    pub const TRAILER_LENGTH: IndexT = CACHE_LINE_LENGTH as IndexT * 2;

    pub(super) fn check_capacity(capacity: IndexT) -> Result<()> {
        if is_power_of_two(capacity) {
            Ok(())
        } else {
            Err(BusError::IllegalArgument)
        }
    }
}

/// Broadcast record framing: an `i32` record length and `i32` message type,
/// followed by the encoded message.
pub mod record_descriptor {
    use crate::util::IndexT;

    /// Message type of records used only to pad out the end of the buffer
    pub const PADDING_MSG_TYPE_ID: i32 = -1;

    /// Offset from the record start to its length field
    pub const LENGTH_OFFSET: IndexT = 0;

    /// Offset from the record start to its type field
    pub const TYPE_OFFSET: IndexT = 4;

    /// Header length of every record
    pub const HEADER_LENGTH: IndexT = 8;

    /// Alignment of records within the buffer
    pub const RECORD_ALIGNMENT: IndexT = HEADER_LENGTH;

    /// Byte offset of a record's length field given the record start
    pub fn length_offset(record_offset: IndexT) -> IndexT {
        record_offset + LENGTH_OFFSET
    }

    /// Byte offset of a record's type field given the record start
    pub fn type_offset(record_offset: IndexT) -> IndexT {
        record_offset + TYPE_OFFSET
    }

    /// Byte offset of a record's message given the record start
    pub fn msg_offset(record_offset: IndexT) -> IndexT {
        record_offset + HEADER_LENGTH
    }
}

/// Single-producer write side of the broadcast buffer. Only the driver
/// transmits, so no claim loop is needed; the tail intent counter lets
/// receivers detect that a record they were reading has been overwritten.
pub struct BroadcastTransmitter<A>
where
    A: AtomicBuffer,
{
    buffer: A,
    capacity: IndexT,
    mask: IndexT,
    max_msg_length: IndexT,
    tail_intent_counter_index: IndexT,
    tail_counter_index: IndexT,
    latest_counter_index: IndexT,
}

impl<A> BroadcastTransmitter<A>
where
    A: AtomicBuffer,
{
    /// Create a transmitter backed by `buffer`.
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = buffer.capacity() - buffer_descriptor::TRAILER_LENGTH;
        buffer_descriptor::check_capacity(capacity)?;

        Ok(BroadcastTransmitter {
            buffer,
            capacity,
            mask: capacity - 1,
            max_msg_length: capacity / 8,
            tail_intent_counter_index: capacity + buffer_descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + buffer_descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index: capacity + buffer_descriptor::LATEST_COUNTER_OFFSET,
        })
    }

    /// Data capacity of the buffer, excluding the trailer
    pub fn capacity(&self) -> IndexT {
        self.capacity
    }

    /// Transmit a message to all receivers. Transmission cannot fail for
    /// lack of space; slow receivers get lapped.
    pub fn transmit(&mut self, msg_type_id: i32, source: &[u8]) -> Result<()> {
        if msg_type_id < 1 {
            return Err(BusError::IllegalArgument);
        }
        let length = source.len() as IndexT;
        if length > self.max_msg_length {
            return Err(BusError::IllegalArgument);
        }

        let record_length = length + record_descriptor::HEADER_LENGTH;
        let aligned_length = align(
            record_length as usize,
            record_descriptor::RECORD_ALIGNMENT as usize,
        ) as IndexT;

        let mut tail = self.buffer.get_i64(self.tail_counter_index)?;
        let mut record_offset = (tail as i32) & self.mask;
        let to_end_of_buffer = self.capacity - record_offset;

        if to_end_of_buffer < aligned_length {
            // Not enough room before the wrap point; pad to the end and
            // start over at offset zero
            self.signal_tail_intent(tail + i64::from(to_end_of_buffer + aligned_length))?;

            self.buffer.put_i32(
                record_descriptor::length_offset(record_offset),
                to_end_of_buffer,
            )?;
            self.buffer.put_i32(
                record_descriptor::type_offset(record_offset),
                record_descriptor::PADDING_MSG_TYPE_ID,
            )?;
            tail += i64::from(to_end_of_buffer);
            record_offset = 0;
        } else {
            self.signal_tail_intent(tail + i64::from(aligned_length))?;
        }

        self.buffer
            .put_i32(record_descriptor::length_offset(record_offset), record_length)?;
        self.buffer
            .put_i32(record_descriptor::type_offset(record_offset), msg_type_id)?;
        self.buffer
            .put_slice(record_descriptor::msg_offset(record_offset), source, 0, length)?;

        self.buffer.put_i64(self.latest_counter_index, tail)?;
        self.buffer
            .put_i64_ordered(self.tail_counter_index, tail + i64::from(aligned_length))?;

        Ok(())
    }

    fn signal_tail_intent(&mut self, new_tail: i64) -> Result<()> {
        self.buffer
            .put_i64_ordered(self.tail_intent_counter_index, new_tail)
    }
}

/// Receive side of the broadcast buffer. Poll
/// [`receive_next`](BroadcastReceiver::receive_next) until `true`, then
/// inspect the current record through the accessor methods, then
/// [`validate`](BroadcastReceiver::validate) that the record was not
/// overwritten while it was being read.
pub struct BroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    buffer: A,
    capacity: IndexT,
    mask: IndexT,
    tail_intent_counter_index: IndexT,
    tail_counter_index: IndexT,
    latest_counter_index: IndexT,
    record_offset: IndexT,
    cursor: i64,
    next_record: i64,
    lapped_count: AtomicI64,
}

impl<A> BroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    /// Create a receiver backed by `buffer`.
    pub fn new(buffer: A) -> Result<Self> {
        let capacity = buffer.capacity() - buffer_descriptor::TRAILER_LENGTH;
        buffer_descriptor::check_capacity(capacity)?;
        let mask = capacity - 1;

        let latest_counter_index = capacity + buffer_descriptor::LATEST_COUNTER_OFFSET;
        let cursor = buffer.get_i64(latest_counter_index)?;

        Ok(BroadcastReceiver {
            buffer,
            capacity,
            mask,
            tail_intent_counter_index: capacity + buffer_descriptor::TAIL_INTENT_COUNTER_OFFSET,
            tail_counter_index: capacity + buffer_descriptor::TAIL_COUNTER_OFFSET,
            latest_counter_index,
            record_offset: (cursor as i32) & mask,
            cursor,
            next_record: cursor,
            lapped_count: AtomicI64::new(0),
        })
    }

    /// Data capacity of the buffer, excluding the trailer
    pub fn capacity(&self) -> IndexT {
        self.capacity
    }

    /// Number of times the transmitter has lapped this receiver. Each lap
    /// represents at least a buffer's worth of lost events.
    pub fn lapped_count(&self) -> i64 {
        self.lapped_count.load(Ordering::SeqCst)
    }

    /// Non-blocking check for the next record. Returns `true` when a record
    /// is available; if loss occurred the lapped count is incremented and
    /// the cursor jumps forward to the most recent record.
    pub fn receive_next(&mut self) -> Result<bool> {
        let mut is_available = false;
        let tail: i64 = self.buffer.get_i64_volatile(self.tail_counter_index)?;
        let mut cursor: i64 = self.next_record;

        if tail > cursor {
            if !self.validate_at(cursor) {
                self.lapped_count.fetch_add(1, Ordering::SeqCst);
                cursor = self.buffer.get_i64(self.latest_counter_index)?;
            }
            let mut record_offset = (cursor as i32) & self.mask;

            self.cursor = cursor;
            self.next_record = cursor
                + align(
                    self.buffer
                        .get_i32(record_descriptor::length_offset(record_offset))?
                        as usize,
                    record_descriptor::RECORD_ALIGNMENT as usize,
                ) as i64;

            if record_descriptor::PADDING_MSG_TYPE_ID
                == self
                    .buffer
                    .get_i32(record_descriptor::type_offset(record_offset))?
            {
                record_offset = 0;
                self.cursor = self.next_record;
                self.next_record += align(
                    self.buffer
                        .get_i32(record_descriptor::length_offset(record_offset))?
                        as usize,
                    record_descriptor::RECORD_ALIGNMENT as usize,
                ) as i64;
            }

            self.record_offset = record_offset;
            is_available = true;
        }

        Ok(is_available)
    }

    /// Length of the message in the current record
    pub fn length(&self) -> Result<i32> {
        Ok(self
            .buffer
            .get_i32(record_descriptor::length_offset(self.record_offset))?
            - record_descriptor::HEADER_LENGTH)
    }

    /// Offset of the message content of the current record
    pub fn offset(&self) -> i32 {
        record_descriptor::msg_offset(self.record_offset)
    }

    /// Message type identifier of the current record
    pub fn msg_type_id(&self) -> Result<i32> {
        self.buffer
            .get_i32(record_descriptor::type_offset(self.record_offset))
    }

    /// Check that the current record has not been overwritten since
    /// [`receive_next`](Self::receive_next) returned it.
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    fn validate_at(&self, cursor: i64) -> bool {
        // UNWRAP: Length checks performed during initialization
        (cursor + i64::from(self.capacity))
            > self
                .buffer
                .get_i64_volatile(self.tail_intent_counter_index)
                .unwrap()
    }
}

const SCRATCH_BUFFER_LENGTH: usize = 4096;

/// Broadcast receiver that copies each record into a private scratch buffer
/// before dispatch, so handlers always see a consistent message even if the
/// transmitter overwrites the source mid-read.
pub struct CopyBroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    receiver: BroadcastReceiver<A>,
    scratch: Vec<u8>,
}

impl<A> CopyBroadcastReceiver<A>
where
    A: AtomicBuffer,
{
    /// Wrap a [`BroadcastReceiver`] with a copying layer.
    pub fn new(receiver: BroadcastReceiver<A>) -> Self {
        CopyBroadcastReceiver {
            receiver,
            scratch: vec![0u8; SCRATCH_BUFFER_LENGTH],
        }
    }

    /// Attempt to receive a single message and deliver it to `handler`.
    /// Returns the number of messages received (0 or 1). The handler gets a
    /// mutable view of the scratch copy so decoders can work on it in
    /// place.
    pub fn receive<F>(&mut self, mut handler: F) -> Result<i32>
    where
        F: FnMut(i32, &mut [u8]),
    {
        let mut messages_received = 0;
        let last_seen_lapped_count = self.receiver.lapped_count();

        if self.receiver.receive_next()? {
            if last_seen_lapped_count != self.receiver.lapped_count() {
                // Events were lost before we ever saw them; the client
                // cannot recover its view of driver state
                return Err(BusError::IllegalState);
            }

            let length = self.receiver.length()?;
            if length as usize > self.scratch.len() {
                return Err(BusError::IllegalState);
            }

            let msg_type_id = self.receiver.msg_type_id()?;
            self.scratch
                .put_bytes(0, &self.receiver.buffer, self.receiver.offset(), length)?;

            if !self.receiver.validate() {
                return Err(BusError::IllegalState);
            }
            handler(msg_type_id, &mut self.scratch[0..length as usize]);
            messages_received += 1;
        }

        Ok(messages_received)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::path::Path;

    use memmap::MmapMut;

    use super::{buffer_descriptor, BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver};

    const CAPACITY: usize = 1024;
    const BUFFER_SIZE: usize = CAPACITY + buffer_descriptor::TRAILER_LENGTH as usize;
    const MSG_TYPE_ID: i32 = 7;

    // Two mappings of one file, the same way a driver and client share the
    // command-and-control file
    fn map_twice(path: &Path) -> (MmapMut, MmapMut) {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap();
        file.set_len(BUFFER_SIZE as u64).unwrap();
        let a = unsafe { MmapMut::map_mut(&file).unwrap() };
        let b = unsafe { MmapMut::map_mut(&file).unwrap() };
        (a, b)
    }

    #[test]
    fn transmit_then_receive_single_message() {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut transmitter = BroadcastTransmitter::new(&mut buffer[..]).unwrap();
        transmitter.transmit(MSG_TYPE_ID, &[1, 2, 3, 4]).unwrap();

        let mut receiver =
            CopyBroadcastReceiver::new(BroadcastReceiver::new(&mut buffer[..]).unwrap());
        let mut seen = Vec::new();
        let received = receiver
            .receive(|msg_type, body| {
                assert_eq!(msg_type, MSG_TYPE_ID);
                seen.extend_from_slice(body);
            })
            .unwrap();

        assert_eq!(received, 1);
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn receiver_sees_messages_in_order_across_wrap() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_map, rx_map) = map_twice(&dir.path().join("broadcast.dat"));

        let mut transmitter = BroadcastTransmitter::new(tx_map).unwrap();
        let mut receiver = CopyBroadcastReceiver::new(BroadcastReceiver::new(rx_map).unwrap());

        // Enough 100-byte messages to wrap the 1024-byte buffer several
        // times, receiving each one before the next transmit so the
        // receiver is never lapped
        for round in 0u8..40 {
            transmitter.transmit(MSG_TYPE_ID, &[round; 100]).unwrap();

            let mut received = 0;
            receiver
                .receive(|msg_type, body| {
                    assert_eq!(msg_type, MSG_TYPE_ID);
                    assert_eq!(body, &[round; 100][..]);
                    received += 1;
                })
                .unwrap();
            assert_eq!(received, 1);
        }
    }

    #[test]
    fn empty_buffer_receives_nothing() {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut receiver =
            CopyBroadcastReceiver::new(BroadcastReceiver::new(&mut buffer[..]).unwrap());
        let received = receiver
            .receive(|_, _| panic!("no message expected"))
            .unwrap();
        assert_eq!(received, 0);
    }

    #[test]
    fn transmit_rejects_oversized_message() {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut transmitter = BroadcastTransmitter::new(&mut buffer[..]).unwrap();
        let oversized = vec![0u8; CAPACITY];
        assert!(transmitter.transmit(MSG_TYPE_ID, &oversized).is_err());
    }
}
