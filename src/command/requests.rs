//! Commands written by clients into the to-driver ring buffer. Each
//! descriptor lays its fields out after the [`request_header`]; the ring
//! buffer record's message type carries the command kind.

use std::mem::size_of;

use crate::command::request_header;
use crate::concurrent::AtomicBuffer;
use crate::util::{BusError, IndexT, Result};

/// Command to add a publication, shared or exclusive (the record's message
/// type distinguishes them).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Client ID                             |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                       Correlation ID                          |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                         Stream ID                             |
/// +---------------------------------------------------------------+
/// |                       Channel Length                          |
/// +---------------------------------------------------------------+
/// |                          Channel                             ...
///...                                                              |
/// +---------------------------------------------------------------+
/// ```
pub mod publication_command {
    use super::*;

    /// Offset of the stream id
    pub const STREAM_ID_OFFSET: IndexT = request_header::LENGTH;

    /// Offset of the channel length prefix
    pub const CHANNEL_OFFSET: IndexT = STREAM_ID_OFFSET + size_of::<i32>() as IndexT;

    /// Encode the command, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        client_id: i64,
        correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        request_header::encode(buffer, client_id, correlation_id)?;
        buffer.put_i32(STREAM_ID_OFFSET, stream_id)?;
        let written = buffer.put_string(CHANNEL_OFFSET, channel)?;
        Ok(CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Stream id of an encoded command
    pub fn stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(STREAM_ID_OFFSET)
    }

    /// Channel URI of an encoded command
    pub fn channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(CHANNEL_OFFSET)
    }
}

/// Command to add a subscription. The extra registration correlation id is
/// the sentinel `-1` on a fresh registration; the driver echoes it when a
/// subscription is re-registered against existing state.
pub mod subscription_command {
    use super::*;

    /// Offset of the registration correlation id
    pub const REGISTRATION_CORRELATION_ID_OFFSET: IndexT = request_header::LENGTH;

    /// Offset of the stream id
    pub const STREAM_ID_OFFSET: IndexT =
        REGISTRATION_CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the channel length prefix
    pub const CHANNEL_OFFSET: IndexT = STREAM_ID_OFFSET + size_of::<i32>() as IndexT;

    /// Encode the command, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        client_id: i64,
        correlation_id: i64,
        registration_correlation_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        request_header::encode(buffer, client_id, correlation_id)?;
        buffer.put_i64(REGISTRATION_CORRELATION_ID_OFFSET, registration_correlation_id)?;
        buffer.put_i32(STREAM_ID_OFFSET, stream_id)?;
        let written = buffer.put_string(CHANNEL_OFFSET, channel)?;
        Ok(CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Registration correlation id of an encoded command
    pub fn registration_correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(REGISTRATION_CORRELATION_ID_OFFSET)
    }

    /// Stream id of an encoded command
    pub fn stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(STREAM_ID_OFFSET)
    }

    /// Channel URI of an encoded command
    pub fn channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(CHANNEL_OFFSET)
    }
}

/// Command removing a publication, subscription, or counter by the
/// registration id the driver acknowledged it under.
pub mod remove_command {
    use super::*;

    /// Offset of the registration id
    pub const REGISTRATION_ID_OFFSET: IndexT = request_header::LENGTH;

    /// Byte length of the command
    pub const LENGTH: IndexT = REGISTRATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the command, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        request_header::encode(buffer, client_id, correlation_id)?;
        buffer.put_i64(REGISTRATION_ID_OFFSET, registration_id)?;
        Ok(LENGTH)
    }

    /// Registration id of an encoded command
    pub fn registration_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(REGISTRATION_ID_OFFSET)
    }
}

/// Command adding or removing a destination on the publication registered
/// under the carried registration id.
pub mod destination_command {
    use super::*;

    /// Offset of the publication registration id
    pub const REGISTRATION_ID_OFFSET: IndexT = request_header::LENGTH;

    /// Offset of the destination channel length prefix
    pub const CHANNEL_OFFSET: IndexT = REGISTRATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the command, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        client_id: i64,
        correlation_id: i64,
        registration_id: i64,
        channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        request_header::encode(buffer, client_id, correlation_id)?;
        buffer.put_i64(REGISTRATION_ID_OFFSET, registration_id)?;
        let written = buffer.put_string(CHANNEL_OFFSET, channel)?;
        Ok(CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Registration id of the publication being modified
    pub fn registration_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(REGISTRATION_ID_OFFSET)
    }

    /// Destination channel URI of an encoded command
    pub fn channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(CHANNEL_OFFSET)
    }
}

/// Command adding a counter. Two variable sections follow the type id: the
/// opaque key bytes and the label, each length-prefixed; the label's
/// position depends on the key length.
pub mod counter_command {
    use super::*;

    /// Offset of the counter type id
    pub const TYPE_ID_OFFSET: IndexT = request_header::LENGTH;

    /// Offset of the key length prefix
    pub const KEY_OFFSET: IndexT = TYPE_ID_OFFSET + size_of::<i32>() as IndexT;

    /// Encode the command, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        client_id: i64,
        correlation_id: i64,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        request_header::encode(buffer, client_id, correlation_id)?;
        buffer.put_i32(TYPE_ID_OFFSET, type_id)?;
        buffer.put_i32(KEY_OFFSET, key.len() as i32)?;
        let key_bytes_offset = KEY_OFFSET + size_of::<i32>() as IndexT;
        buffer.put_slice(key_bytes_offset, key, 0, key.len() as IndexT)?;
        let written = buffer.put_string(key_bytes_offset + key.len() as IndexT, label)?;
        Ok(key_bytes_offset + key.len() as IndexT + size_of::<i32>() as IndexT + written)
    }

    /// Counter type id of an encoded command
    pub fn type_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(TYPE_ID_OFFSET)
    }

    /// Opaque key bytes of an encoded command
    pub fn key<A>(buffer: &A) -> Result<&[u8]>
    where
        A: AtomicBuffer,
    {
        let key_length = buffer.get_i32(KEY_OFFSET)?;
        let begin = KEY_OFFSET + size_of::<i32>() as IndexT;
        // A corrupt negative length also fails the bounds check
        buffer.bounds_check(begin, key_length)?;
        Ok(&buffer[begin as usize..(begin + key_length) as usize])
    }

    /// Label of an encoded command
    pub fn label<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        let key_length = buffer.get_i32(KEY_OFFSET)?;
        if key_length < 0 {
            return Err(BusError::IllegalState);
        }
        buffer.get_string(KEY_OFFSET + size_of::<i32>() as IndexT + key_length)
    }
}

#[cfg(test)]
mod tests {
    use super::{counter_command, publication_command, subscription_command};
    use crate::command::request_header;

    #[test]
    fn publication_command_round_trip() {
        let mut buffer = vec![0u8; 256];
        let length = publication_command::encode(
            &mut buffer,
            5,
            42,
            7,
            "bus:udp?endpoint=localhost:40123",
        )
        .unwrap();

        // header + stream id + channel prefix + channel bytes
        assert_eq!(length, 16 + 4 + 4 + 32);
        assert_eq!(request_header::client_id(&buffer), Ok(5));
        assert_eq!(request_header::correlation_id(&buffer), Ok(42));
        assert_eq!(publication_command::stream_id(&buffer), Ok(7));
        assert_eq!(
            publication_command::channel(&buffer),
            Ok("bus:udp?endpoint=localhost:40123")
        );
    }

    #[test]
    fn subscription_command_carries_registration_sentinel() {
        let mut buffer = vec![0u8; 256];
        subscription_command::encode(&mut buffer, 5, 43, -1, 9, "bus:ipc").unwrap();

        assert_eq!(subscription_command::registration_correlation_id(&buffer), Ok(-1));
        assert_eq!(subscription_command::stream_id(&buffer), Ok(9));
        assert_eq!(subscription_command::channel(&buffer), Ok("bus:ipc"));
    }

    #[test]
    fn counter_command_key_and_label_round_trip() {
        let mut buffer = vec![0u8; 256];
        let length =
            counter_command::encode(&mut buffer, 5, 44, 3, &[9, 8, 7], "ingress-errors").unwrap();

        // header + type id + key prefix + key + label prefix + label bytes
        assert_eq!(length, 16 + 4 + 4 + 3 + 4 + 14);
        assert_eq!(counter_command::type_id(&buffer), Ok(3));
        assert_eq!(counter_command::key(&buffer).unwrap(), &[9, 8, 7]);
        assert_eq!(counter_command::label(&buffer), Ok("ingress-errors"));
    }

    #[test]
    fn counter_command_accepts_an_empty_key() {
        let mut buffer = vec![0u8; 64];
        counter_command::encode(&mut buffer, 5, 44, 3, &[], "x").unwrap();

        assert_eq!(counter_command::key(&buffer).unwrap(), &[] as &[u8]);
        assert_eq!(counter_command::label(&buffer), Ok("x"));
    }
}
