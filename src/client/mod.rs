//! Client-side API over the media driver: the conductor agent, the
//! resources it manages, and the locked [`Client`] handle shared between
//! application threads.
//!
//! The conductor runs as a single agent. Application threads call the
//! [`Client`] API, which takes the client-wide lock and parks inside the
//! conductor until the driver responds; the conductor's own work loop
//! acquires the same lock with `try_lock`, so an API caller always makes
//! progress and the work loop never starves a caller. Deployments that are
//! single-threaded by construction (the cluster sequencer) own a
//! [`ClientConductor`] directly and skip the lock.

pub mod conductor;
pub mod context;
pub mod counter;
pub mod image;
pub mod log_buffers;
pub mod publication;
pub mod registry;
pub mod subscription;

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::client::conductor::ClientConductor;
use crate::client::context::ClientContext;
use crate::client::counter::Counter;
use crate::client::log_buffers::{LogBuffersFactory, MappedFileFactory};
use crate::client::publication::Publication;
use crate::client::subscription::{AvailableImageHandler, Subscription, UnavailableImageHandler};
use crate::cnc::CncFile;
use crate::concurrent::agent::Agent;
use crate::concurrent::broadcast::{BroadcastReceiver, CopyBroadcastReceiver};
use crate::concurrent::buffer::MappedRegion;
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::AtomicBuffer;
use crate::counters::CountersReader;
use crate::driver_events::DriverEventsAdapter;
use crate::driver_proxy::DriverProxy;
use crate::util::{BusError, Result};

/// Shared handle to a conductor, locking it per API call.
pub struct Client<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    conductor: Arc<Mutex<ClientConductor<A, F>>>,
}

impl<A, F> Clone for Client<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    fn clone(&self) -> Self {
        Client {
            conductor: Arc::clone(&self.conductor),
        }
    }
}

impl<A, F> Client<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    /// Wrap an assembled conductor in a locked client handle.
    pub fn new(conductor: ClientConductor<A, F>) -> Self {
        Client {
            conductor: Arc::new(Mutex::new(conductor)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ClientConductor<A, F>>> {
        self.conductor.lock().map_err(|_| BusError::IllegalState)
    }

    /// See [`ClientConductor::add_publication`].
    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<Arc<Publication<A>>> {
        self.lock()?.add_publication(channel, stream_id)
    }

    /// See [`ClientConductor::add_exclusive_publication`].
    pub fn add_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<Publication<A>>> {
        self.lock()?.add_exclusive_publication(channel, stream_id)
    }

    /// See [`ClientConductor::add_subscription`].
    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<Arc<Subscription<A>>> {
        self.lock()?.add_subscription(channel, stream_id)
    }

    /// See [`ClientConductor::add_subscription_with_handlers`].
    pub fn add_subscription_with_handlers(
        &self,
        channel: &str,
        stream_id: i32,
        on_available_image: Option<AvailableImageHandler<A>>,
        on_unavailable_image: Option<UnavailableImageHandler<A>>,
    ) -> Result<Arc<Subscription<A>>> {
        self.lock()?.add_subscription_with_handlers(
            channel,
            stream_id,
            on_available_image,
            on_unavailable_image,
        )
    }

    /// See [`ClientConductor::add_counter`].
    pub fn add_counter(&self, type_id: i32, key: &[u8], label: &str) -> Result<Arc<Counter<A>>> {
        self.lock()?.add_counter(type_id, key, label)
    }

    /// See [`ClientConductor::release_publication`].
    pub fn release_publication(&self, registration_id: i64) -> Result<()> {
        self.lock()?.release_publication(registration_id)
    }

    /// See [`ClientConductor::release_subscription`].
    pub fn release_subscription(&self, registration_id: i64) -> Result<()> {
        self.lock()?.release_subscription(registration_id)
    }

    /// See [`ClientConductor::release_counter`].
    pub fn release_counter(&self, registration_id: i64) -> Result<()> {
        self.lock()?.release_counter(registration_id)
    }

    /// See [`ClientConductor::add_destination`].
    pub fn add_destination(&self, publication_registration_id: i64, channel: &str) -> Result<()> {
        self.lock()?.add_destination(publication_registration_id, channel)
    }

    /// See [`ClientConductor::remove_destination`].
    pub fn remove_destination(
        &self,
        publication_registration_id: i64,
        channel: &str,
    ) -> Result<()> {
        self.lock()?
            .remove_destination(publication_registration_id, channel)
    }

    /// Close the conductor and release every resource. Idempotent.
    pub fn close(&self) -> Result<()> {
        self.lock()?.close()
    }

    /// True once the conductor has closed.
    pub fn is_closed(&self) -> bool {
        self.lock().map(|c| c.is_closed()).unwrap_or(true)
    }

    /// Agent driving this client's conductor under the client lock.
    pub fn conductor_agent(&self) -> ConductorAgent<A, F> {
        ConductorAgent {
            conductor: Arc::clone(&self.conductor),
        }
    }
}

impl Client<MappedRegion, MappedFileFactory> {
    /// Connect to a running media driver through its command-and-control
    /// file.
    pub fn connect(context: ClientContext) -> Result<Self> {
        let cnc = CncFile::map_existing(&context.driver_dir)?;

        let to_driver = ManyToOneRingBuffer::new(cnc.to_driver)?;
        let events = DriverEventsAdapter::new(CopyBroadcastReceiver::new(BroadcastReceiver::new(
            cnc.to_clients,
        )?));
        let counters = CountersReader::new(cnc.counter_values);

        let conductor = ClientConductor::new(
            context,
            DriverProxy::new(to_driver),
            events,
            counters,
            MappedFileFactory,
        );
        Ok(Client::new(conductor))
    }
}

/// Agent adapter running a locked conductor's duty cycle. `try_lock` keeps
/// the work loop from contending with an API caller parked in
/// `await_response`.
pub struct ConductorAgent<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    conductor: Arc<Mutex<ClientConductor<A, F>>>,
}

impl<A, F> Agent for ConductorAgent<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    fn do_work(&mut self) -> Result<usize> {
        match self.conductor.try_lock() {
            Ok(mut conductor) => conductor.do_work(),
            Err(TryLockError::WouldBlock) => Ok(0),
            Err(TryLockError::Poisoned(_)) => Err(BusError::IllegalState),
        }
    }

    fn role_name(&self) -> &str {
        "client-conductor"
    }

    fn on_close(&mut self) {
        if let Ok(mut conductor) = self.conductor.lock() {
            let _ = conductor.close();
        }
    }
}
