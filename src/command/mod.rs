//! Layouts of the messages crossing the command-and-control file, written
//! the same way the ring buffer and broadcast buffers describe their
//! framing: a descriptor module per message holding offset constants plus
//! encode and accessor functions over an [`AtomicBuffer`]. There is no
//! struct overlay; every field read and write goes through the buffer's
//! checked accessors at a named offset.
//!
//! Commands (client to driver) are in [`requests`] and all lead with the
//! [`request_header`]; events (driver to clients) are in [`events`] and
//! lead with the correlation id of the command they acknowledge.

pub mod events;
pub mod requests;

use crate::concurrent::AtomicBuffer;

/// Header leading every command: which client is asking, and the
/// correlation id threading the request through its driver round trip. A
/// keepalive or close indication is this header alone, with the sentinel
/// correlation id `-1` since no response is expected.
pub mod request_header {
    use super::AtomicBuffer;
    use crate::util::{IndexT, Result};

    /// Offset of the client id
    pub const CLIENT_ID_OFFSET: IndexT = 0;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = 8;

    /// Byte length of the header
    pub const LENGTH: IndexT = 16;

    /// Correlation id used when a command expects no response
    pub const NO_CORRELATION_ID: i64 = -1;

    /// Write the header at the start of `buffer`, returning its length.
    pub fn encode<A>(buffer: &mut A, client_id: i64, correlation_id: i64) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CLIENT_ID_OFFSET, client_id)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        Ok(LENGTH)
    }

    /// Client id of an encoded command
    pub fn client_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CLIENT_ID_OFFSET)
    }

    /// Correlation id of an encoded command
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::request_header;

    #[test]
    fn request_header_round_trip() {
        let mut buffer = vec![0u8; request_header::LENGTH as usize];
        assert_eq!(
            request_header::encode(&mut buffer, 5, 42),
            Ok(request_header::LENGTH)
        );
        assert_eq!(request_header::client_id(&buffer), Ok(5));
        assert_eq!(request_header::correlation_id(&buffer), Ok(42));
    }

    #[test]
    fn header_rejects_short_buffers() {
        let mut buffer = vec![0u8; 8];
        assert!(request_header::encode(&mut buffer, 5, 42).is_err());
    }
}
