//! Events broadcast by the driver over the to-clients buffer. Each
//! descriptor leads with the correlation id of the command it acknowledges;
//! image events instead carry the registration id of the owning
//! subscription, since they arrive unprompted.

use std::mem::size_of;

use crate::concurrent::AtomicBuffer;
use crate::util::{BusError, IndexT, Result};

/// Acknowledgement of a publication registration, shared or exclusive (the
/// record's message type distinguishes them).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Correlation ID                          |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                      Registration ID                          |
/// |                                                               |
/// +---------------------------------------------------------------+
/// |                         Session ID                            |
/// +---------------------------------------------------------------+
/// |                         Stream ID                             |
/// +---------------------------------------------------------------+
/// |                 Publication Limit Counter ID                  |
/// +---------------------------------------------------------------+
/// |                  Channel Status Indicator ID                  |
/// +---------------------------------------------------------------+
/// |                     Log File Length                           |
/// +---------------------------------------------------------------+
/// |                        Log File                              ...
///...                                                              |
/// +---------------------------------------------------------------+
/// ```
///
/// The registration id is driver-assigned and differs from the correlation
/// id when the driver satisfies the command by sharing an existing
/// publication.
pub mod publication_ready {
    use super::*;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Offset of the driver-assigned registration id
    pub const REGISTRATION_ID_OFFSET: IndexT = 8;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = 16;

    /// Offset of the stream id
    pub const STREAM_ID_OFFSET: IndexT = 20;

    /// Offset of the publication limit counter id
    pub const PUBLICATION_LIMIT_COUNTER_ID_OFFSET: IndexT = 24;

    /// Offset of the channel status indicator id
    pub const CHANNEL_STATUS_ID_OFFSET: IndexT = 28;

    /// Offset of the log file path length prefix
    pub const LOG_FILE_OFFSET: IndexT = 32;

    /// Encode the event, returning its total byte length.
    #[allow(clippy::too_many_arguments)]
    pub fn encode<A>(
        buffer: &mut A,
        correlation_id: i64,
        registration_id: i64,
        session_id: i32,
        stream_id: i32,
        publication_limit_counter_id: i32,
        channel_status_indicator_id: i32,
        log_file: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(REGISTRATION_ID_OFFSET, registration_id)?;
        buffer.put_i32(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i32(STREAM_ID_OFFSET, stream_id)?;
        buffer.put_i32(PUBLICATION_LIMIT_COUNTER_ID_OFFSET, publication_limit_counter_id)?;
        buffer.put_i32(CHANNEL_STATUS_ID_OFFSET, channel_status_indicator_id)?;
        let written = buffer.put_string(LOG_FILE_OFFSET, log_file)?;
        Ok(LOG_FILE_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Correlation id of the acknowledged command
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Driver-assigned registration id backing the publication
    pub fn registration_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(REGISTRATION_ID_OFFSET)
    }

    /// Session id assigned to the publication
    pub fn session_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(SESSION_ID_OFFSET)
    }

    /// Stream id of the publication
    pub fn stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(STREAM_ID_OFFSET)
    }

    /// Counter id of the publication limit position
    pub fn publication_limit_counter_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(PUBLICATION_LIMIT_COUNTER_ID_OFFSET)
    }

    /// Counter id of the channel status indicator, or the no-id sentinel
    pub fn channel_status_indicator_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(CHANNEL_STATUS_ID_OFFSET)
    }

    /// Path of the memory-mapped log file backing the publication
    pub fn log_file<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(LOG_FILE_OFFSET)
    }
}

/// Acknowledgement of a subscription registration.
pub mod subscription_ready {
    use super::*;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Offset of the channel status indicator id
    pub const CHANNEL_STATUS_ID_OFFSET: IndexT = 8;

    /// Byte length of the event
    pub const LENGTH: IndexT = 12;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        correlation_id: i64,
        channel_status_indicator_id: i32,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i32(CHANNEL_STATUS_ID_OFFSET, channel_status_indicator_id)?;
        Ok(LENGTH)
    }

    /// Correlation id of the acknowledged command
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Counter id of the channel status indicator, or the no-id sentinel
    pub fn channel_status_indicator_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(CHANNEL_STATUS_ID_OFFSET)
    }
}

/// Bare acknowledgement of a command with no dedicated response body
/// (removals, destination changes).
pub mod operation_succeeded {
    use super::*;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Byte length of the event
    pub const LENGTH: IndexT = 8;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(buffer: &mut A, correlation_id: i64) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        Ok(LENGTH)
    }

    /// Correlation id of the acknowledged command
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }
}

/// Acknowledgement of a counter registration, carrying the allocated cell.
pub mod counter_ready {
    use super::*;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Offset of the allocated counter id
    pub const COUNTER_ID_OFFSET: IndexT = 8;

    /// Byte length of the event
    pub const LENGTH: IndexT = 12;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(buffer: &mut A, correlation_id: i64, counter_id: i32) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i32(COUNTER_ID_OFFSET, counter_id)?;
        Ok(LENGTH)
    }

    /// Correlation id of the acknowledged command
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Id of the allocated counter cell
    pub fn counter_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(COUNTER_ID_OFFSET)
    }
}

/// Announcement that a remote publication's image buffers are available on
/// a subscription. Two variable sections follow the fixed block: the log
/// file path and the source identity, each length-prefixed; the source
/// identity's position depends on the log file length.
pub mod image_ready {
    use super::*;

    /// Offset of the correlation id identifying the image
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Offset of the owning subscription's registration id
    pub const SUBSCRIPTION_REGISTRATION_ID_OFFSET: IndexT = 8;

    /// Offset of the remote session id
    pub const SESSION_ID_OFFSET: IndexT = 16;

    /// Offset of the subscriber position counter id
    pub const SUBSCRIBER_POSITION_ID_OFFSET: IndexT = 20;

    /// Offset of the log file path length prefix
    pub const LOG_FILE_OFFSET: IndexT = 24;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        correlation_id: i64,
        subscription_registration_id: i64,
        session_id: i32,
        subscriber_position_id: i32,
        log_file: &str,
        source_identity: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(SUBSCRIPTION_REGISTRATION_ID_OFFSET, subscription_registration_id)?;
        buffer.put_i32(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i32(SUBSCRIBER_POSITION_ID_OFFSET, subscriber_position_id)?;
        let log_file_written = buffer.put_string(LOG_FILE_OFFSET, log_file)?;
        let source_identity_offset =
            LOG_FILE_OFFSET + size_of::<i32>() as IndexT + log_file_written;
        let written = buffer.put_string(source_identity_offset, source_identity)?;
        Ok(source_identity_offset + size_of::<i32>() as IndexT + written)
    }

    /// Correlation id identifying the image
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Registration id of the owning subscription
    pub fn subscription_registration_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SUBSCRIPTION_REGISTRATION_ID_OFFSET)
    }

    /// Session id of the remote publication
    pub fn session_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(SESSION_ID_OFFSET)
    }

    /// Counter id of the subscriber position
    pub fn subscriber_position_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(SUBSCRIBER_POSITION_ID_OFFSET)
    }

    /// Path of the memory-mapped log file backing the image
    pub fn log_file<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(LOG_FILE_OFFSET)
    }

    /// Transport-specific identity of the image's source
    pub fn source_identity<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        let log_file_length = buffer.get_i32(LOG_FILE_OFFSET)?;
        if log_file_length < 0 {
            return Err(BusError::IllegalState);
        }
        buffer.get_string(LOG_FILE_OFFSET + size_of::<i32>() as IndexT + log_file_length)
    }
}

/// Announcement that an image became unavailable on a subscription.
pub mod image_unavailable {
    use super::*;

    /// Offset of the correlation id identifying the image
    pub const CORRELATION_ID_OFFSET: IndexT = 0;

    /// Offset of the owning subscription's registration id
    pub const SUBSCRIPTION_REGISTRATION_ID_OFFSET: IndexT = 8;

    /// Offset of the stream id the image carried
    pub const STREAM_ID_OFFSET: IndexT = 16;

    /// Offset of the channel length prefix
    pub const CHANNEL_OFFSET: IndexT = 20;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        correlation_id: i64,
        subscription_registration_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(SUBSCRIPTION_REGISTRATION_ID_OFFSET, subscription_registration_id)?;
        buffer.put_i32(STREAM_ID_OFFSET, stream_id)?;
        let written = buffer.put_string(CHANNEL_OFFSET, channel)?;
        Ok(CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Correlation id identifying the image
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Registration id of the owning subscription
    pub fn subscription_registration_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SUBSCRIPTION_REGISTRATION_ID_OFFSET)
    }

    /// Stream id the image carried
    pub fn stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(STREAM_ID_OFFSET)
    }

    /// Channel URI the image carried
    pub fn channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(CHANNEL_OFFSET)
    }
}

/// Failure report for a command. For channel-endpoint errors the offending
/// id is a status indicator counter id rather than a correlation id.
pub mod error_response {
    use super::*;

    /// Offset of the offending correlation id (or status indicator id)
    pub const OFFENDING_ID_OFFSET: IndexT = 0;

    /// Offset of the error code
    pub const ERROR_CODE_OFFSET: IndexT = 8;

    /// Offset of the error message length prefix
    pub const ERROR_MESSAGE_OFFSET: IndexT = 12;

    /// Encode the event, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        offending_id: i64,
        error_code: i32,
        error_message: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(OFFENDING_ID_OFFSET, offending_id)?;
        buffer.put_i32(ERROR_CODE_OFFSET, error_code)?;
        let written = buffer.put_string(ERROR_MESSAGE_OFFSET, error_message)?;
        Ok(ERROR_MESSAGE_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Id the error applies to
    pub fn offending_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(OFFENDING_ID_OFFSET)
    }

    /// Error code reported by the driver
    pub fn error_code<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(ERROR_CODE_OFFSET)
    }

    /// Human-readable error message
    pub fn error_message<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(ERROR_MESSAGE_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::{error_response, image_ready, publication_ready};

    #[test]
    fn publication_ready_round_trip() {
        let mut buffer = vec![0u8; 256];
        let length =
            publication_ready::encode(&mut buffer, 42, 17, 1, 7, 3, 4, "/dev/shm/bus/log-17")
                .unwrap();

        assert_eq!(length, 32 + 4 + 19);
        assert_eq!(publication_ready::correlation_id(&buffer), Ok(42));
        assert_eq!(publication_ready::registration_id(&buffer), Ok(17));
        assert_eq!(publication_ready::session_id(&buffer), Ok(1));
        assert_eq!(publication_ready::stream_id(&buffer), Ok(7));
        assert_eq!(publication_ready::publication_limit_counter_id(&buffer), Ok(3));
        assert_eq!(publication_ready::channel_status_indicator_id(&buffer), Ok(4));
        assert_eq!(publication_ready::log_file(&buffer), Ok("/dev/shm/bus/log-17"));
    }

    #[test]
    fn image_ready_variable_sections_round_trip() {
        let mut buffer = vec![0u8; 256];
        image_ready::encode(
            &mut buffer,
            1042,
            42,
            11,
            6,
            "/dev/shm/bus/images/1042.logbuffer",
            "192.168.0.2:40124",
        )
        .unwrap();

        assert_eq!(
            image_ready::log_file(&buffer),
            Ok("/dev/shm/bus/images/1042.logbuffer")
        );
        assert_eq!(image_ready::source_identity(&buffer), Ok("192.168.0.2:40124"));
    }

    #[test]
    fn error_response_round_trip() {
        let mut buffer = vec![0u8; 128];
        error_response::encode(&mut buffer, 42, 11, "invalid channel").unwrap();

        assert_eq!(error_response::offending_id(&buffer), Ok(42));
        assert_eq!(error_response::error_code(&buffer), Ok(11));
        assert_eq!(error_response::error_message(&buffer), Ok("invalid channel"));
    }
}
