//! Capability traits over the cluster transports. The media side of the
//! ingress subscription and log publication belongs to the driver; the
//! sequencer only needs controlled polling with re-delivery, and
//! reserve-encode-commit appends with back-pressure.
//!
//! Every fragment is a self-describing frame: it begins with the cluster
//! [`message_header`](crate::cluster::codecs::message_header), so the
//! transports move opaque byte regions and never interpret message kinds
//! themselves.

use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::AtomicBuffer;
use crate::util::{IndexT, Result};

/// Record type tag used for cluster frames on ring-buffer transports. A
/// single container type: the message kind lives in the frame's own header.
pub const FRAME_MSG_TYPE_ID: i32 = 1;

/// Outcome of handling one polled fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlledPollAction {
    /// The fragment was consumed; the poller may deliver the next one.
    Continue,
    /// The fragment was not consumed; the poller must stop and re-deliver
    /// the same fragment on the next poll.
    Abort,
}

/// Poll side of a framed transport: delivers whole frames (header plus
/// typed block) as mutable regions, honoring
/// [`ControlledPollAction::Abort`] re-delivery.
pub trait FragmentPoller {
    /// Poll up to `limit` fragments into `handler`, returning the number of
    /// fragments consumed.
    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&mut [u8]) -> ControlledPollAction,
        limit: usize,
    ) -> Result<usize>;
}

/// Append side of a framed transport. `try_claim` reserves a region of
/// `length` bytes, hands it to `filler` for in-place encoding (header
/// included), and commits; `Ok(false)` means the transport is
/// back-pressured and the caller decides whether to retry.
pub trait EventPublication {
    /// Reserve and publish a frame of `length` bytes.
    fn try_claim(&mut self, length: IndexT, filler: &mut dyn FnMut(&mut [u8])) -> Result<bool>;
}

/// [`EventPublication`] over a ring buffer, for logs and response channels
/// that live in shared memory on the same host.
pub struct RingBufferPublication<A>
where
    A: AtomicBuffer,
{
    ring: ManyToOneRingBuffer<A>,
}

impl<A> RingBufferPublication<A>
where
    A: AtomicBuffer,
{
    /// Wrap a ring buffer as an event publication.
    pub fn new(ring: ManyToOneRingBuffer<A>) -> Self {
        RingBufferPublication { ring }
    }

    /// Access the underlying ring buffer, e.g. to read appended frames.
    pub fn ring_mut(&mut self) -> &mut ManyToOneRingBuffer<A> {
        &mut self.ring
    }
}

impl<A> EventPublication for RingBufferPublication<A>
where
    A: AtomicBuffer,
{
    fn try_claim(&mut self, length: IndexT, filler: &mut dyn FnMut(&mut [u8])) -> Result<bool> {
        let msg_index = self.ring.try_claim(FRAME_MSG_TYPE_ID, length)?;
        if msg_index < 0 {
            return Ok(false);
        }

        let begin = msg_index as usize;
        let end = begin + length as usize;
        filler(&mut self.ring[begin..end]);
        self.ring.commit(msg_index)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{EventPublication, RingBufferPublication, FRAME_MSG_TYPE_ID};
    use crate::cluster::codecs::{message_header, ClusterMessageType};
    use crate::concurrent::ringbuffer::{buffer_descriptor, ManyToOneRingBuffer};

    const BUFFER_SIZE: usize = 1024 + buffer_descriptor::TRAILER_LENGTH as usize;

    #[test]
    fn claimed_frame_is_published_after_fill() {
        let ring = ManyToOneRingBuffer::new(vec![0u8; BUFFER_SIZE]).unwrap();
        let mut publication = RingBufferPublication::new(ring);

        let length = message_header::ENCODED_LENGTH + 4;
        let appended = publication
            .try_claim(length, &mut |mut frame| {
                message_header::encode(&mut frame, ClusterMessageType::TimerEvent).unwrap();
                frame[message_header::ENCODED_LENGTH as usize..].copy_from_slice(&[1, 2, 3, 4]);
            })
            .unwrap();
        assert!(appended);

        let mut seen = Vec::new();
        publication
            .ring_mut()
            .read(|msg_type, body| seen.push((msg_type, body.to_vec())))
            .unwrap();

        assert_eq!(seen.len(), 1);
        let (record_type, frame) = &seen[0];
        assert_eq!(*record_type, FRAME_MSG_TYPE_ID);
        assert_eq!(
            message_header::msg_type(frame),
            Ok(ClusterMessageType::TimerEvent as i32)
        );
        assert_eq!(&frame[message_header::ENCODED_LENGTH as usize..], &[1, 2, 3, 4]);
    }

    #[test]
    fn full_ring_reports_back_pressure() {
        let ring = ManyToOneRingBuffer::new(vec![0u8; BUFFER_SIZE]).unwrap();
        let mut publication = RingBufferPublication::new(ring);

        while publication.try_claim(64, &mut |_| {}).unwrap() {}
        assert!(!publication.try_claim(64, &mut |_| {}).unwrap());
    }
}
