//! Receive handle bound to a channel and stream, owning zero or more
//! images. A subscription shell is registered before the driver's
//! acknowledgement arrives, because an available-image event can overtake
//! the subscription-ready event; the status indicator is attached when the
//! acknowledgement lands.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::image::Image;
use crate::concurrent::AtomicBuffer;
use crate::counters::NO_ID_ALLOCATED;

/// Callback invoked when an image becomes available on a subscription.
pub type AvailableImageHandler<A> = Box<dyn Fn(&Image<A>) + Send + Sync>;

/// Callback invoked when an image becomes unavailable on a subscription.
pub type UnavailableImageHandler<A> = Box<dyn Fn(&Image<A>) + Send + Sync>;

/// A receive handle acknowledged (or about to be acknowledged) by the
/// driver.
pub struct Subscription<A>
where
    A: AtomicBuffer,
{
    channel: String,
    registration_id: i64,
    stream_id: i32,
    channel_status_id: AtomicI32,
    images: Mutex<Vec<Arc<Image<A>>>>,
    on_available_image: Option<AvailableImageHandler<A>>,
    on_unavailable_image: Option<UnavailableImageHandler<A>>,
    is_closed: AtomicBool,
}

impl<A> Subscription<A>
where
    A: AtomicBuffer,
{
    pub(crate) fn new(
        channel: String,
        registration_id: i64,
        stream_id: i32,
        on_available_image: Option<AvailableImageHandler<A>>,
        on_unavailable_image: Option<UnavailableImageHandler<A>>,
    ) -> Self {
        Subscription {
            channel,
            registration_id,
            stream_id,
            channel_status_id: AtomicI32::new(NO_ID_ALLOCATED),
            images: Mutex::new(Vec::new()),
            on_available_image,
            on_unavailable_image,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Channel URI this subscription receives on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registration id under which this client requested the subscription
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Stream id this subscription receives on
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Counter id of the channel status indicator; the no-id sentinel until
    /// the driver's acknowledgement arrives
    pub fn channel_status_id(&self) -> i32 {
        self.channel_status_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_channel_status_id(&self, status_id: i32) {
        self.channel_status_id.store(status_id, Ordering::Release);
    }

    /// Number of images currently connected
    pub fn image_count(&self) -> usize {
        // UNWRAP: the images lock is never poisoned by design; handler
        // panics are caught before reaching it
        self.images.lock().unwrap().len()
    }

    /// Snapshot of the currently connected images
    pub fn images(&self) -> Vec<Arc<Image<A>>> {
        // UNWRAP: see `image_count`
        self.images.lock().unwrap().clone()
    }

    /// True when an image with the given correlation id is tracked
    pub fn has_image(&self, correlation_id: i64) -> bool {
        // UNWRAP: see `image_count`
        self.images
            .lock()
            .unwrap()
            .iter()
            .any(|image| image.correlation_id() == correlation_id)
    }

    pub(crate) fn add_image(&self, image: Arc<Image<A>>) {
        // UNWRAP: see `image_count`
        self.images.lock().unwrap().push(image);
    }

    pub(crate) fn remove_image(&self, correlation_id: i64) -> Option<Arc<Image<A>>> {
        // UNWRAP: see `image_count`
        let mut images = self.images.lock().unwrap();
        let index = images
            .iter()
            .position(|image| image.correlation_id() == correlation_id)?;
        Some(images.swap_remove(index))
    }

    pub(crate) fn drain_images(&self) -> Vec<Arc<Image<A>>> {
        // UNWRAP: see `image_count`
        let mut images = self.images.lock().unwrap();
        std::mem::replace(&mut *images, Vec::new())
    }

    pub(crate) fn available_image_handler(&self) -> Option<&AvailableImageHandler<A>> {
        self.on_available_image.as_ref()
    }

    pub(crate) fn unavailable_image_handler(&self) -> Option<&UnavailableImageHandler<A>> {
        self.on_unavailable_image.as_ref()
    }

    /// True once the subscription has been released or force-closed
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
