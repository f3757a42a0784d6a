//! Layouts of the cluster ingress, egress, and log frames, as descriptor
//! modules in the same style as the control protocol codecs. Every frame
//! begins with the [`message_header`]; each typed block follows at
//! [`message_header::ENCODED_LENGTH`]. Session message frames share one
//! layout between ingress and the log, so the sequencer can stamp the
//! timestamp in place and forward the frame unchanged.

use std::mem::size_of;

use crate::concurrent::AtomicBuffer;
use crate::control_protocol::define_enum;
use crate::util::{IndexT, Result};

define_enum!(
    #[doc = "Message types crossing the cluster ingress, egress, and log"]
    pub enum ClusterMessageType {
        #[doc = "Client requests a new session (ingress)"]
        SessionConnect = 0x21,
        #[doc = "Client closes its session (ingress)"]
        SessionClose = 0x22,
        #[doc = "Session message (ingress, forwarded to the log unchanged)"]
        SessionMessage = 0x23,
        #[doc = "Client keepalive (ingress)"]
        SessionKeepAlive = 0x24,
        #[doc = "Session lifecycle acknowledgement (egress)"]
        SessionEvent = 0x25,
        #[doc = "Session admitted to the cluster (log)"]
        SessionOpenEvent = 0x31,
        #[doc = "Session left the cluster (log)"]
        SessionCloseEvent = 0x32,
        #[doc = "Timer expired (log)"]
        TimerEvent = 0x33,
    }
);

define_enum!(
    #[doc = "Reason a session close event was logged"]
    pub enum CloseReason {
        #[doc = "The client asked for the close"]
        UserAction = 0,
        #[doc = "The session timed out"]
        Timeout = 1,
        #[doc = "An administrative action closed the session"]
        ServiceAction = 2,
    }
);

/// Codes carried by egress session events
pub mod session_event_code {
    /// The request succeeded
    pub const OK: i32 = 0;
    /// The request failed; the detail string explains why
    pub const ERROR: i32 = 1;
}

/// Header leading every cluster frame: the message type and the schema
/// version it was encoded under.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Message Type                            |
/// +---------------------------------------------------------------+
/// |                         Version                               |
/// +---------------------------------------------------------------+
/// |                       Typed Block                            ...
///...                                                              |
/// +---------------------------------------------------------------+
/// ```
pub mod message_header {
    use super::*;

    /// Offset of the message type
    pub const TYPE_OFFSET: IndexT = 0;

    /// Offset of the schema version
    pub const VERSION_OFFSET: IndexT = 4;

    /// Byte length of the header preceding every typed block
    pub const ENCODED_LENGTH: IndexT = 8;

    /// Version written by this generation of the codecs
    pub const SCHEMA_VERSION: i32 = 1;

    /// Write the header at the start of `buffer`, returning its length.
    pub fn encode<A>(buffer: &mut A, msg_type: ClusterMessageType) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        buffer.put_i32(TYPE_OFFSET, msg_type as i32)?;
        buffer.put_i32(VERSION_OFFSET, SCHEMA_VERSION)?;
        Ok(ENCODED_LENGTH)
    }

    /// Message type of an encoded frame
    pub fn msg_type<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(TYPE_OFFSET)
    }

    /// Schema version of an encoded frame
    pub fn version<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(VERSION_OFFSET)
    }
}

/// Ingress request to open a session.
pub mod session_connect {
    use super::*;

    /// Offset of the correlation id chosen by the connecting client
    pub const CORRELATION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the stream id the client listens for responses on
    pub const RESPONSE_STREAM_ID_OFFSET: IndexT =
        CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the response channel length prefix
    pub const RESPONSE_CHANNEL_OFFSET: IndexT =
        RESPONSE_STREAM_ID_OFFSET + size_of::<i32>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        correlation_id: i64,
        response_stream_id: i32,
        response_channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionConnect)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i32(RESPONSE_STREAM_ID_OFFSET, response_stream_id)?;
        let written = buffer.put_string(RESPONSE_CHANNEL_OFFSET, response_channel)?;
        Ok(RESPONSE_CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Response stream id of an encoded frame
    pub fn response_stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(RESPONSE_STREAM_ID_OFFSET)
    }

    /// Response channel URI of an encoded frame
    pub fn response_channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(RESPONSE_CHANNEL_OFFSET)
    }
}

/// A session message, on ingress and in the log. The payload follows the
/// fixed block at [`PAYLOAD_OFFSET`](session_message::PAYLOAD_OFFSET); the
/// sequencer overwrites the timestamp with the cluster clock before
/// forwarding the frame.
pub mod session_message {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the correlation id chosen by the sending client
    pub const CORRELATION_ID_OFFSET: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the cluster timestamp
    pub const TIMESTAMP_OFFSET: IndexT = CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the payload
    pub const PAYLOAD_OFFSET: IndexT = TIMESTAMP_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        session_id: i64,
        correlation_id: i64,
        timestamp_ms: i64,
        payload: &[u8],
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionMessage)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(TIMESTAMP_OFFSET, timestamp_ms)?;
        buffer.put_slice(PAYLOAD_OFFSET, payload, 0, payload.len() as IndexT)?;
        Ok(PAYLOAD_OFFSET + payload.len() as IndexT)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Cluster timestamp of an encoded frame, epoch milliseconds
    pub fn timestamp_ms<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(TIMESTAMP_OFFSET)
    }

    /// Overwrite the timestamp; done by the sequencer before forwarding
    pub fn put_timestamp_ms<A>(buffer: &mut A, value: i64) -> Result<()>
    where
        A: AtomicBuffer,
    {
        buffer.put_i64(TIMESTAMP_OFFSET, value)
    }

    /// Payload of an encoded frame
    pub fn payload<A>(buffer: &A) -> Result<&[u8]>
    where
        A: AtomicBuffer,
    {
        buffer.bounds_check(PAYLOAD_OFFSET, 0)?;
        Ok(&buffer[PAYLOAD_OFFSET as usize..])
    }
}

/// Ingress keepalive refreshing a session's activity.
pub mod session_keep_alive {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the correlation id
    pub const CORRELATION_ID_OFFSET: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Byte length of the frame
    pub const LENGTH: IndexT = CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(buffer: &mut A, session_id: i64, correlation_id: i64) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionKeepAlive)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        Ok(LENGTH)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }
}

/// Ingress request to close a session.
pub mod session_close {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Byte length of the frame
    pub const LENGTH: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(buffer: &mut A, session_id: i64) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionClose)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        Ok(LENGTH)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }
}

/// Egress event acknowledging a session lifecycle step, with a detail
/// string for failures.
pub mod session_event {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the correlation id being acknowledged
    pub const CORRELATION_ID_OFFSET: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the outcome code
    pub const CODE_OFFSET: IndexT = CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the detail length prefix
    pub const DETAIL_OFFSET: IndexT = CODE_OFFSET + size_of::<i32>() as IndexT;

    /// Total frame length for a given detail string; the claim size for
    /// header, block, and detail together.
    pub fn length(detail: &str) -> IndexT {
        DETAIL_OFFSET + size_of::<i32>() as IndexT + detail.len() as IndexT
    }

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        session_id: i64,
        correlation_id: i64,
        code: i32,
        detail: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionEvent)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i32(CODE_OFFSET, code)?;
        let written = buffer.put_string(DETAIL_OFFSET, detail)?;
        Ok(DETAIL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Outcome code of an encoded frame, one of [`session_event_code`]
    pub fn code<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(CODE_OFFSET)
    }

    /// Detail string of an encoded frame, empty on success
    pub fn detail<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(DETAIL_OFFSET)
    }
}

/// Log event recording a session's admission, including how to reach the
/// client so a replaying node can restore the session.
pub mod session_open_event {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the correlation id of the originating connect request
    pub const CORRELATION_ID_OFFSET: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the cluster timestamp of the admission
    pub const TIMESTAMP_OFFSET: IndexT = CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the response stream id
    pub const RESPONSE_STREAM_ID_OFFSET: IndexT = TIMESTAMP_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the response channel length prefix
    pub const RESPONSE_CHANNEL_OFFSET: IndexT =
        RESPONSE_STREAM_ID_OFFSET + size_of::<i32>() as IndexT;

    /// Total frame length for a given response channel; the claim size for
    /// header, block, and channel together.
    pub fn length(response_channel: &str) -> IndexT {
        RESPONSE_CHANNEL_OFFSET + size_of::<i32>() as IndexT + response_channel.len() as IndexT
    }

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        session_id: i64,
        correlation_id: i64,
        timestamp_ms: i64,
        response_stream_id: i32,
        response_channel: &str,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionOpenEvent)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(TIMESTAMP_OFFSET, timestamp_ms)?;
        buffer.put_i32(RESPONSE_STREAM_ID_OFFSET, response_stream_id)?;
        let written = buffer.put_string(RESPONSE_CHANNEL_OFFSET, response_channel)?;
        Ok(RESPONSE_CHANNEL_OFFSET + size_of::<i32>() as IndexT + written)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Cluster timestamp of an encoded frame, epoch milliseconds
    pub fn timestamp_ms<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(TIMESTAMP_OFFSET)
    }

    /// Response stream id of an encoded frame
    pub fn response_stream_id<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(RESPONSE_STREAM_ID_OFFSET)
    }

    /// Response channel URI of an encoded frame
    pub fn response_channel<A>(buffer: &A) -> Result<&str>
    where
        A: AtomicBuffer,
    {
        buffer.get_string(RESPONSE_CHANNEL_OFFSET)
    }
}

/// Log event recording a session's departure.
pub mod session_close_event {
    use super::*;

    /// Offset of the session id
    pub const SESSION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the cluster timestamp of the close
    pub const TIMESTAMP_OFFSET: IndexT = SESSION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Offset of the close reason
    pub const REASON_OFFSET: IndexT = TIMESTAMP_OFFSET + size_of::<i64>() as IndexT;

    /// Byte length of the frame
    pub const LENGTH: IndexT = REASON_OFFSET + size_of::<i32>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(
        buffer: &mut A,
        session_id: i64,
        timestamp_ms: i64,
        reason: CloseReason,
    ) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::SessionCloseEvent)?;
        buffer.put_i64(SESSION_ID_OFFSET, session_id)?;
        buffer.put_i64(TIMESTAMP_OFFSET, timestamp_ms)?;
        buffer.put_i32(REASON_OFFSET, reason as i32)?;
        Ok(LENGTH)
    }

    /// Session id of an encoded frame
    pub fn session_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(SESSION_ID_OFFSET)
    }

    /// Cluster timestamp of an encoded frame, epoch milliseconds
    pub fn timestamp_ms<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(TIMESTAMP_OFFSET)
    }

    /// Close reason of an encoded frame, a [`CloseReason`] value
    pub fn close_reason<A>(buffer: &A) -> Result<i32>
    where
        A: AtomicBuffer,
    {
        buffer.get_i32(REASON_OFFSET)
    }
}

/// Log event recording a timer expiry.
pub mod timer_event {
    use super::*;

    /// Offset of the correlation id the timer was scheduled under
    pub const CORRELATION_ID_OFFSET: IndexT = message_header::ENCODED_LENGTH;

    /// Offset of the cluster timestamp of the expiry
    pub const TIMESTAMP_OFFSET: IndexT = CORRELATION_ID_OFFSET + size_of::<i64>() as IndexT;

    /// Byte length of the frame
    pub const LENGTH: IndexT = TIMESTAMP_OFFSET + size_of::<i64>() as IndexT;

    /// Encode the frame, returning its total byte length.
    pub fn encode<A>(buffer: &mut A, correlation_id: i64, timestamp_ms: i64) -> Result<IndexT>
    where
        A: AtomicBuffer,
    {
        message_header::encode(buffer, ClusterMessageType::TimerEvent)?;
        buffer.put_i64(CORRELATION_ID_OFFSET, correlation_id)?;
        buffer.put_i64(TIMESTAMP_OFFSET, timestamp_ms)?;
        Ok(LENGTH)
    }

    /// Correlation id of an encoded frame
    pub fn correlation_id<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(CORRELATION_ID_OFFSET)
    }

    /// Cluster timestamp of an encoded frame, epoch milliseconds
    pub fn timestamp_ms<A>(buffer: &A) -> Result<i64>
    where
        A: AtomicBuffer,
    {
        buffer.get_i64(TIMESTAMP_OFFSET)
    }
}
