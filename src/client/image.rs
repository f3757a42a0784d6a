//! Per-remote-source view of a subscribed stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::log_buffers::LogBuffers;
use crate::concurrent::AtomicBuffer;
use crate::counters::Position;
use crate::util::Result;

/// One remote publication's image on a subscription, with its own
/// subscriber position counter.
pub struct Image<A>
where
    A: AtomicBuffer,
{
    correlation_id: i64,
    session_id: i32,
    subscription_registration_id: i64,
    source_identity: String,
    subscriber_position: Position<A>,
    log_buffers: Arc<LogBuffers>,
    is_closed: AtomicBool,
}

impl<A> Image<A>
where
    A: AtomicBuffer,
{
    pub(crate) fn new(
        correlation_id: i64,
        session_id: i32,
        subscription_registration_id: i64,
        source_identity: String,
        subscriber_position: Position<A>,
        log_buffers: Arc<LogBuffers>,
    ) -> Self {
        Image {
            correlation_id,
            session_id,
            subscription_registration_id,
            source_identity,
            subscriber_position,
            log_buffers,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Correlation id identifying this image at the driver
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    /// Session id of the remote publication
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Registration id of the subscription this image belongs to
    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    /// Transport-specific identity of the source
    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    /// Position this subscriber has consumed up to
    pub fn position(&self) -> Result<i64> {
        self.subscriber_position.get()
    }

    /// Byte length of the mapped log backing this image
    pub fn log_length(&self) -> usize {
        self.log_buffers.length()
    }

    /// True once the image has become unavailable
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
