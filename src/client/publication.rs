//! Send handle bound to a channel and stream. Shared publications may be
//! returned to several callers; exclusive publications have a single
//! writer. The handle itself is passive here: term-buffer packing belongs
//! to the transport layer, so a publication exposes identity, its limit
//! position, and lifecycle state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::log_buffers::LogBuffers;
use crate::concurrent::AtomicBuffer;
use crate::counters::Position;
use crate::util::{BusError, Result};

/// A send handle acknowledged by the driver.
pub struct Publication<A>
where
    A: AtomicBuffer,
{
    channel: String,
    registration_id: i64,
    original_registration_id: i64,
    stream_id: i32,
    session_id: i32,
    publication_limit: Position<A>,
    channel_status_id: i32,
    log_buffers: Arc<LogBuffers>,
    is_closed: AtomicBool,
}

impl<A> Publication<A>
where
    A: AtomicBuffer,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: String,
        registration_id: i64,
        original_registration_id: i64,
        stream_id: i32,
        session_id: i32,
        publication_limit: Position<A>,
        channel_status_id: i32,
        log_buffers: Arc<LogBuffers>,
    ) -> Self {
        Publication {
            channel,
            registration_id,
            original_registration_id,
            stream_id,
            session_id,
            publication_limit,
            channel_status_id,
            log_buffers,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Channel URI this publication sends on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registration id under which this client requested the publication
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Driver-assigned registration id of the underlying log. Differs from
    /// [`registration_id`](Self::registration_id) when the driver satisfied
    /// the request by sharing an existing publication.
    pub fn original_registration_id(&self) -> i64 {
        self.original_registration_id
    }

    /// Stream id this publication sends on
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Session id assigned by the driver
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Counter id of the channel status indicator, or the no-id sentinel
    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id
    }

    /// Current flow-control limit position beyond which offers would be
    /// back-pressured
    pub fn position_limit(&self) -> Result<i64> {
        if self.is_closed() {
            return Err(BusError::ClientClosed);
        }
        self.publication_limit.get()
    }

    /// Byte length of the mapped log backing this publication
    pub fn log_length(&self) -> usize {
        self.log_buffers.length()
    }

    /// True once the publication has been released or force-closed
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
