//! The client conductor: a single-threaded agent mediating between the
//! public messaging API and the media driver. One work cycle checks the
//! conductor's own liveness obligations (keep-alives out, driver heartbeat
//! in, lingering resources), then drains a bounded batch of driver events.
//! API calls submit a command and park in the response-await loop until the
//! matching acknowledgement arrives or the driver timeout elapses.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::client::context::{ClientContext, ErrorHandler};
use crate::client::counter::Counter;
use crate::client::image::Image;
use crate::client::log_buffers::{LogBuffersCache, LogBuffersFactory};
use crate::client::publication::Publication;
use crate::client::registry::{Resource, ResourceRegistry};
use crate::client::subscription::{AvailableImageHandler, Subscription, UnavailableImageHandler};
use crate::concurrent::agent::{Agent, AgentInvoker};
use crate::concurrent::clock::{EpochClock, NanoClock};
use crate::concurrent::AtomicBuffer;
use crate::counters::{CountersReader, Position, MAX_KEY_LENGTH, MAX_LABEL_LENGTH};
use crate::driver_events::{DriverEventHandler, DriverEventsAdapter, ImageReady, PublicationReady};
use crate::driver_proxy::DriverProxy;
use crate::util::{BusError, Result};

/// A work cycle that runs again within this window skips the timeout checks
const IDLE_SLEEP_NS: i64 = 16_000_000;

/// Cadence of the lingering-resource sweep
const RESOURCE_CHECK_INTERVAL_NS: i64 = 1_000_000_000;

/// Maximum driver events drained per work cycle
const EVENT_POLL_LIMIT: usize = 10;

/// Park period between `await_response` service passes
const AWAIT_PARK: Duration = Duration::from_millis(1);

struct PendingPublication {
    channel: String,
}

/// Everything the conductor mutates while dispatching driver events. Split
/// from the events adapter so one can borrow the other during a drain.
struct ConductorState<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    driver_proxy: DriverProxy<A>,
    counters: Arc<CountersReader<A>>,
    registry: ResourceRegistry<A>,
    log_buffers: LogBuffersCache<F>,
    pending_publications: HashMap<i64, PendingPublication>,
    pending_error: Option<(i64, BusError)>,
    error_handler: ErrorHandler,
    error_counter: Option<Position<A>>,
    nano_clock: Box<dyn NanoClock + Send>,
    epoch_clock: Box<dyn EpochClock + Send>,
    driver_agent_invoker: Option<AgentInvoker<Box<dyn Agent + Send>>>,
    keep_alive_interval_ns: i64,
    driver_timeout_ms: i64,
    driver_timeout_ns: i64,
    inter_service_timeout_ns: i64,
    resource_linger_ns: i64,
    time_of_last_service_ns: i64,
    time_of_last_keep_alive_ns: i64,
    time_of_last_resource_check_ns: i64,
    is_closed: bool,
}

/// The client-side conductor agent.
pub struct ClientConductor<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    events_adapter: DriverEventsAdapter<A>,
    state: ConductorState<A, F>,
}

impl<A, F> ClientConductor<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    /// Assemble a conductor from its transports and configuration.
    pub fn new(
        context: ClientContext,
        driver_proxy: DriverProxy<A>,
        events_adapter: DriverEventsAdapter<A>,
        counters: CountersReader<A>,
        log_buffers_factory: F,
    ) -> Self {
        let now_ns = context.nano_clock.nano_time();
        let counters = Arc::new(counters);
        let error_counter = context
            .error_counter_id
            .map(|counter_id| Position::new(Arc::clone(&counters), counter_id));
        ClientConductor {
            events_adapter,
            state: ConductorState {
                driver_proxy,
                counters,
                registry: ResourceRegistry::new(),
                log_buffers: LogBuffersCache::new(log_buffers_factory),
                pending_publications: HashMap::new(),
                pending_error: None,
                error_handler: context.error_handler,
                error_counter,
                nano_clock: context.nano_clock,
                epoch_clock: context.epoch_clock,
                driver_agent_invoker: context.driver_agent_invoker,
                keep_alive_interval_ns: context.keep_alive_interval_ns,
                driver_timeout_ms: context.driver_timeout_ms,
                driver_timeout_ns: context.driver_timeout_ms * 1_000_000,
                inter_service_timeout_ns: context.inter_service_timeout_ns,
                resource_linger_ns: context.resource_linger_ns,
                time_of_last_service_ns: now_ns,
                time_of_last_keep_alive_ns: now_ns,
                time_of_last_resource_check_ns: now_ns,
                is_closed: false,
            },
        }
    }

    /// Register a publication on `channel` and `stream_id`, waiting for the
    /// driver's acknowledgement. A second request against an open shared
    /// publication on the same channel and stream returns the same handle.
    pub fn add_publication(
        &mut self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<Publication<A>>> {
        self.state.ensure_open()?;

        if let Some(existing) = self.state.registry.find_shared_publication(channel, stream_id) {
            return Ok(existing);
        }

        let correlation_id = self.state.driver_proxy.add_publication(channel, stream_id)?;
        self.state.pending_publications.insert(
            correlation_id,
            PendingPublication {
                channel: channel.to_string(),
            },
        );

        if let Err(e) = self.await_response(correlation_id) {
            self.state.pending_publications.remove(&correlation_id);
            return Err(e);
        }

        match self.state.registry.get(correlation_id) {
            Some(Resource::SharedPublication(publication)) => Ok(Arc::clone(publication)),
            _ => Err(BusError::IllegalState),
        }
    }

    /// Register an exclusive publication on `channel` and `stream_id`,
    /// waiting for the driver's acknowledgement. Every call produces a
    /// distinct publication.
    pub fn add_exclusive_publication(
        &mut self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<Publication<A>>> {
        self.state.ensure_open()?;

        let correlation_id = self
            .state
            .driver_proxy
            .add_exclusive_publication(channel, stream_id)?;
        self.state.pending_publications.insert(
            correlation_id,
            PendingPublication {
                channel: channel.to_string(),
            },
        );

        if let Err(e) = self.await_response(correlation_id) {
            self.state.pending_publications.remove(&correlation_id);
            return Err(e);
        }

        match self.state.registry.get(correlation_id) {
            Some(Resource::ExclusivePublication(publication)) => Ok(Arc::clone(publication)),
            _ => Err(BusError::IllegalState),
        }
    }

    /// Register a subscription on `channel` and `stream_id` without image
    /// handlers.
    pub fn add_subscription(
        &mut self,
        channel: &str,
        stream_id: i32,
    ) -> Result<Arc<Subscription<A>>> {
        self.add_subscription_with_handlers(channel, stream_id, None, None)
    }

    /// Register a subscription on `channel` and `stream_id`. The
    /// subscription shell goes into the registry before the driver's
    /// acknowledgement so an early available-image event can resolve it.
    pub fn add_subscription_with_handlers(
        &mut self,
        channel: &str,
        stream_id: i32,
        on_available_image: Option<AvailableImageHandler<A>>,
        on_unavailable_image: Option<UnavailableImageHandler<A>>,
    ) -> Result<Arc<Subscription<A>>> {
        self.state.ensure_open()?;

        let correlation_id = self.state.driver_proxy.add_subscription(channel, stream_id)?;
        let subscription = Arc::new(Subscription::new(
            channel.to_string(),
            correlation_id,
            stream_id,
            on_available_image,
            on_unavailable_image,
        ));
        self.state
            .registry
            .register(correlation_id, Resource::Subscription(Arc::clone(&subscription)))?;

        match self.await_response(correlation_id) {
            Ok(()) => Ok(subscription),
            Err(e) => {
                // The shell may already have been removed by the error event
                if let Some(Resource::Subscription(shell)) =
                    self.state.registry.remove(correlation_id)
                {
                    shell.mark_closed();
                }
                Err(e)
            }
        }
    }

    /// Allocate a counter of `type_id` with the supplied key and label,
    /// waiting for the driver's acknowledgement.
    pub fn add_counter(
        &mut self,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<Arc<Counter<A>>> {
        self.state.ensure_open()?;

        if key.len() > MAX_KEY_LENGTH as usize || label.len() > MAX_LABEL_LENGTH as usize {
            return Err(BusError::IllegalArgument);
        }

        let correlation_id = self.state.driver_proxy.add_counter(type_id, key, label)?;
        self.await_response(correlation_id)?;

        match self.state.registry.get(correlation_id) {
            Some(Resource::Counter(counter)) => Ok(Arc::clone(counter)),
            _ => Err(BusError::IllegalState),
        }
    }

    /// Release the publication registered under `registration_id` and wait
    /// for the driver's acknowledgement. Releasing an id that is no longer
    /// registered is a no-op.
    pub fn release_publication(&mut self, registration_id: i64) -> Result<()> {
        self.state.ensure_open()?;

        match self.state.registry.remove(registration_id) {
            Some(Resource::SharedPublication(publication))
            | Some(Resource::ExclusivePublication(publication)) => {
                publication.mark_closed();
                let now_ns = self.state.nano_clock.nano_time();
                self.state
                    .log_buffers
                    .release(publication.original_registration_id(), now_ns);
                let correlation_id = self.state.driver_proxy.remove_publication(registration_id)?;
                self.await_response(correlation_id)
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Release the subscription registered under `registration_id` and wait
    /// for the driver's acknowledgement. Its images become unavailable.
    pub fn release_subscription(&mut self, registration_id: i64) -> Result<()> {
        self.state.ensure_open()?;

        match self.state.registry.remove(registration_id) {
            Some(Resource::Subscription(subscription)) => {
                subscription.mark_closed();
                let now_ns = self.state.nano_clock.nano_time();
                for image in subscription.drain_images() {
                    image.mark_closed();
                    if let Some(handler) = subscription.unavailable_image_handler() {
                        self.state.invoke_image_handler(handler, &image);
                    }
                    self.state.log_buffers.release(image.correlation_id(), now_ns);
                }
                let correlation_id = self
                    .state
                    .driver_proxy
                    .remove_subscription(registration_id)?;
                self.await_response(correlation_id)
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Release the counter registered under `registration_id` and wait for
    /// the driver's acknowledgement.
    pub fn release_counter(&mut self, registration_id: i64) -> Result<()> {
        self.state.ensure_open()?;

        match self.state.registry.remove(registration_id) {
            Some(Resource::Counter(counter)) => {
                counter.mark_closed();
                let correlation_id = self.state.driver_proxy.remove_counter(registration_id)?;
                self.await_response(correlation_id)
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Fire-and-forget release of a publication, used during teardown.
    pub fn async_release_publication(&mut self, registration_id: i64) -> Result<()> {
        match self.state.registry.remove(registration_id) {
            Some(Resource::SharedPublication(publication))
            | Some(Resource::ExclusivePublication(publication)) => {
                publication.mark_closed();
                let now_ns = self.state.nano_clock.nano_time();
                self.state
                    .log_buffers
                    .release(publication.original_registration_id(), now_ns);
                self.state.driver_proxy.remove_publication(registration_id)?;
                Ok(())
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Fire-and-forget release of a subscription, used during teardown.
    pub fn async_release_subscription(&mut self, registration_id: i64) -> Result<()> {
        match self.state.registry.remove(registration_id) {
            Some(Resource::Subscription(subscription)) => {
                subscription.mark_closed();
                let now_ns = self.state.nano_clock.nano_time();
                for image in subscription.drain_images() {
                    image.mark_closed();
                    self.state.log_buffers.release(image.correlation_id(), now_ns);
                }
                self.state.driver_proxy.remove_subscription(registration_id)?;
                Ok(())
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Fire-and-forget release of a counter, used during teardown.
    pub fn async_release_counter(&mut self, registration_id: i64) -> Result<()> {
        match self.state.registry.remove(registration_id) {
            Some(Resource::Counter(counter)) => {
                counter.mark_closed();
                self.state.driver_proxy.remove_counter(registration_id)?;
                Ok(())
            }
            Some(other) => {
                // UNWRAP: the slot was vacated by the remove above
                self.state.registry.register(registration_id, other).unwrap();
                Err(BusError::IllegalArgument)
            }
            None => Ok(()),
        }
    }

    /// Add a destination to the publication registered under
    /// `publication_registration_id` and wait for acknowledgement.
    pub fn add_destination(
        &mut self,
        publication_registration_id: i64,
        channel: &str,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let correlation_id = self
            .state
            .driver_proxy
            .add_destination(publication_registration_id, channel)?;
        self.await_response(correlation_id)
    }

    /// Remove a destination from the publication registered under
    /// `publication_registration_id` and wait for acknowledgement.
    pub fn remove_destination(
        &mut self,
        publication_registration_id: i64,
        channel: &str,
    ) -> Result<()> {
        self.state.ensure_open()?;
        let correlation_id = self
            .state
            .driver_proxy
            .remove_destination(publication_registration_id, channel)?;
        self.await_response(correlation_id)
    }

    /// True once the conductor has closed, by request or by timeout.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed
    }

    /// Number of live registered resources.
    pub fn resource_count(&self) -> usize {
        self.state.registry.len()
    }

    /// Number of live mapped log buffers.
    pub fn mapped_log_count(&self) -> usize {
        self.state.log_buffers.cached_count()
    }

    /// Number of released log buffers still inside their linger window.
    pub fn lingering_log_count(&self) -> usize {
        self.state.log_buffers.lingering_count()
    }

    /// Refcount of the log buffer for a registration id; zero when unmapped.
    pub fn log_buffer_refcount(&self, registration_id: i64) -> i32 {
        self.state.log_buffers.refcount(registration_id)
    }

    /// Close the conductor: force-close every resource, notify the driver,
    /// and physically release all lingering log buffers. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.state.is_closed {
            return Ok(());
        }
        self.state.is_closed = true;

        let lingering_before = self.state.log_buffers.lingering_count();
        self.state.force_close_resources();
        if self.state.log_buffers.lingering_count() > lingering_before {
            // Give the driver a moment to observe the removal commands
            // before the mappings go away
            thread::sleep(Duration::from_millis(1));
        }

        if let Err(e) = self.state.driver_proxy.send_client_close() {
            self.state.raise_error(&e);
        }
        self.state.log_buffers.release_all_lingering();
        Ok(())
    }

    /// One conductor work cycle: liveness checks, then a bounded event
    /// drain.
    pub fn do_work(&mut self) -> Result<usize> {
        if self.state.is_closed {
            return Err(BusError::ClientClosed);
        }

        let mut work_count = self.on_check_timeouts()?;
        work_count += self.service(EVENT_POLL_LIMIT);
        Ok(work_count)
    }

    fn on_check_timeouts(&mut self) -> Result<usize> {
        let now_ns = self.state.nano_clock.nano_time();
        let mut work_count = 0;

        if now_ns - self.state.time_of_last_service_ns < IDLE_SLEEP_NS {
            return Ok(0);
        }

        if now_ns - self.state.time_of_last_service_ns > self.state.inter_service_timeout_ns {
            warn!(
                "conductor service interval exceeded: {} ns since last cycle",
                now_ns - self.state.time_of_last_service_ns
            );
            let lingering_before = self.state.log_buffers.lingering_count();
            self.state.force_close_resources();
            if self.state.log_buffers.lingering_count() > lingering_before {
                thread::sleep(Duration::from_secs(1));
            }
            self.state.is_closed = true;
            let error = BusError::ServiceTimeout(self.state.inter_service_timeout_ns);
            self.state.raise_error(&error);
            return Err(error);
        }

        self.state.time_of_last_service_ns = now_ns;

        if now_ns - self.state.time_of_last_keep_alive_ns > self.state.keep_alive_interval_ns {
            let now_ms = self.state.epoch_clock.time_ms();
            let last_driver_ms = self.state.driver_proxy.time_of_last_driver_keepalive_ms();
            if now_ms > last_driver_ms + self.state.driver_timeout_ms {
                warn!(
                    "driver heartbeat stale: last {} ms, now {} ms",
                    last_driver_ms, now_ms
                );
                self.state.force_close_resources();
                self.state.is_closed = true;
                let error = BusError::DriverTimeout(self.state.driver_timeout_ms);
                self.state.raise_error(&error);
                return Err(error);
            }

            if let Err(e) = self.state.driver_proxy.send_client_keepalive() {
                self.state.raise_error(&e);
            }
            self.state.time_of_last_keep_alive_ns = now_ns;
            work_count += 1;
        }

        if now_ns - self.state.time_of_last_resource_check_ns > RESOURCE_CHECK_INTERVAL_NS {
            work_count += self
                .state
                .log_buffers
                .release_lingering(now_ns, self.state.resource_linger_ns);
            self.state.time_of_last_resource_check_ns = now_ns;
        }

        Ok(work_count)
    }

    /// Drain up to `limit` driver events into the conductor state.
    fn service(&mut self, limit: usize) -> usize {
        let mut events = 0;
        while events < limit {
            match self.events_adapter.receive(&mut self.state) {
                Ok(0) => break,
                Ok(_) => events += 1,
                Err(e) => {
                    self.state.raise_error(&e);
                    break;
                }
            }
        }
        events
    }

    /// Park (or invoke the embedded driver agent) and service events until
    /// the response for `correlation_id` arrives or the driver timeout
    /// elapses.
    fn await_response(&mut self, correlation_id: i64) -> Result<()> {
        self.state.pending_error = None;
        let deadline_ns = self.state.nano_clock.nano_time() + self.state.driver_timeout_ns;

        loop {
            if let Some(invoker) = self.state.driver_agent_invoker.as_mut() {
                invoker.invoke();
            } else {
                thread::sleep(AWAIT_PARK);
            }

            self.service(usize::max_value());

            if self.events_adapter.last_received_correlation_id() == correlation_id {
                if let Some((id, error)) = self.state.pending_error.take() {
                    if id == correlation_id {
                        return Err(error);
                    }
                }
                return Ok(());
            }

            if self.state.nano_clock.nano_time() > deadline_ns {
                return Err(BusError::DriverTimeout(self.state.driver_timeout_ms));
            }
        }
    }
}

impl<A, F> Agent for ClientConductor<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    fn do_work(&mut self) -> Result<usize> {
        ClientConductor::do_work(self)
    }

    fn role_name(&self) -> &str {
        "client-conductor"
    }

    fn on_close(&mut self) {
        let _ = self.close();
    }
}

impl<A, F> ConductorState<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed {
            Err(BusError::ClientClosed)
        } else {
            Ok(())
        }
    }

    /// Deliver an error to the sink, bumping the error counter when one is
    /// configured.
    fn raise_error(&mut self, error: &BusError) {
        if let Some(counter) = self.error_counter.as_ref() {
            if let Ok(current) = counter.get() {
                let _ = counter.set_ordered(current + 1);
            }
        }
        (self.error_handler)(error);
    }

    fn force_close_resources(&mut self) {
        let now_ns = self.nano_clock.nano_time();
        for (registration_id, resource) in self.registry.drain() {
            match resource {
                Resource::SharedPublication(publication)
                | Resource::ExclusivePublication(publication) => {
                    publication.mark_closed();
                    let _ = self.driver_proxy.remove_publication(registration_id);
                    self.log_buffers
                        .release(publication.original_registration_id(), now_ns);
                }
                Resource::Subscription(subscription) => {
                    subscription.mark_closed();
                    for image in subscription.drain_images() {
                        image.mark_closed();
                        self.log_buffers.release(image.correlation_id(), now_ns);
                    }
                    let _ = self.driver_proxy.remove_subscription(registration_id);
                }
                Resource::Counter(counter) => {
                    counter.mark_closed();
                    let _ = self.driver_proxy.remove_counter(registration_id);
                }
            }
        }
    }

    fn invoke_image_handler(&mut self, handler: &AvailableImageHandler<A>, image: &Image<A>) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(image))) {
            let message = if let Some(text) = panic.downcast_ref::<&str>() {
                (*text).to_string()
            } else if let Some(text) = panic.downcast_ref::<String>() {
                text.clone()
            } else {
                "unknown panic".to_string()
            };
            self.raise_error(&BusError::HandlerPanic(message));
        }
    }

    fn register_publication(&mut self, event: &PublicationReady<'_>, exclusive: bool) {
        let pending = match self.pending_publications.remove(&event.correlation_id) {
            Some(pending) => pending,
            // Not ours, or already abandoned by a timed-out caller
            None => return,
        };

        let log_buffers = match self
            .log_buffers
            .acquire(event.registration_id, event.log_file)
        {
            Ok(log_buffers) => log_buffers,
            Err(e) => {
                self.pending_error = Some((event.correlation_id, e));
                return;
            }
        };

        let publication = Arc::new(Publication::new(
            pending.channel,
            event.correlation_id,
            event.registration_id,
            event.stream_id,
            event.session_id,
            Position::new(Arc::clone(&self.counters), event.publication_limit_counter_id),
            event.channel_status_indicator_id,
            log_buffers,
        ));
        let resource = if exclusive {
            Resource::ExclusivePublication(publication)
        } else {
            Resource::SharedPublication(publication)
        };
        if let Err(e) = self.registry.register(event.correlation_id, resource) {
            self.raise_error(&e);
        }
    }
}

impl<A, F> DriverEventHandler for ConductorState<A, F>
where
    A: AtomicBuffer,
    F: LogBuffersFactory,
{
    fn on_new_publication(&mut self, event: &PublicationReady<'_>) {
        self.register_publication(event, false);
    }

    fn on_new_exclusive_publication(&mut self, event: &PublicationReady<'_>) {
        self.register_publication(event, true);
    }

    fn on_new_subscription(&mut self, correlation_id: i64, channel_status_indicator_id: i32) {
        if let Some(subscription) = self.registry.find_subscription(correlation_id) {
            subscription.set_channel_status_id(channel_status_indicator_id);
        }
    }

    fn on_new_counter(&mut self, correlation_id: i64, counter_id: i32) {
        let counter = Arc::new(Counter::new(
            correlation_id,
            Position::new(Arc::clone(&self.counters), counter_id),
        ));
        if let Err(e) = self
            .registry
            .register(correlation_id, Resource::Counter(counter))
        {
            self.raise_error(&e);
        }
    }

    fn on_operation_success(&mut self, _correlation_id: i64) {}

    fn on_available_image(&mut self, event: &ImageReady<'_>) {
        let subscription = match self
            .registry
            .find_subscription(event.subscription_registration_id)
        {
            Some(subscription) => subscription,
            None => return,
        };
        if subscription.has_image(event.correlation_id) {
            return;
        }

        let log_buffers = match self
            .log_buffers
            .acquire(event.correlation_id, event.log_file)
        {
            Ok(log_buffers) => log_buffers,
            Err(e) => {
                self.raise_error(&e);
                return;
            }
        };

        let image = Arc::new(Image::new(
            event.correlation_id,
            event.session_id,
            event.subscription_registration_id,
            event.source_identity.to_string(),
            Position::new(Arc::clone(&self.counters), event.subscriber_position_id),
            log_buffers,
        ));

        if let Some(handler) = subscription.available_image_handler() {
            self.invoke_image_handler(handler, &image);
        }
        subscription.add_image(image);
    }

    fn on_unavailable_image(&mut self, correlation_id: i64, subscription_registration_id: i64) {
        let subscription = match self.registry.find_subscription(subscription_registration_id) {
            Some(subscription) => subscription,
            None => return,
        };

        if let Some(image) = subscription.remove_image(correlation_id) {
            image.mark_closed();
            if let Some(handler) = subscription.unavailable_image_handler() {
                self.invoke_image_handler(handler, &image);
            }
            let now_ns = self.nano_clock.nano_time();
            self.log_buffers.release(correlation_id, now_ns);
        }
    }

    fn on_error(&mut self, correlation_id: i64, code: i32, message: &str) {
        // A failed registration can only have a pre-registered subscription
        // shell in the registry; anything else stays put
        if let Some(resource) = self.registry.remove(correlation_id) {
            match resource {
                Resource::Subscription(shell) => shell.mark_closed(),
                other => {
                    // UNWRAP: the slot was vacated by the remove above
                    self.registry.register(correlation_id, other).unwrap();
                }
            }
        }
        self.pending_publications.remove(&correlation_id);
        self.pending_error = Some((
            correlation_id,
            BusError::Registration {
                code,
                message: message.to_string(),
            },
        ));
    }

    fn on_channel_endpoint_error(&mut self, status_indicator_id: i32, message: &str) {
        let mut matches = 0;
        for resource in self.registry.values() {
            let resource_status_id = match resource {
                Resource::SharedPublication(publication)
                | Resource::ExclusivePublication(publication) => publication.channel_status_id(),
                Resource::Subscription(subscription) => subscription.channel_status_id(),
                Resource::Counter(_) => continue,
            };
            if resource_status_id == status_indicator_id {
                matches += 1;
            }
        }

        for _ in 0..matches {
            self.raise_error(&BusError::ChannelEndpoint {
                status_indicator_id,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::log_buffers::tests::StubFactory;
    use crate::concurrent::broadcast::{self, BroadcastReceiver, CopyBroadcastReceiver};
    use crate::concurrent::clock::{CachedEpochClock, CachedNanoClock};
    use crate::concurrent::ringbuffer::{self, ManyToOneRingBuffer};
    use std::cell::Cell;
    use std::rc::Rc;

    fn test_conductor() -> ClientConductor<Vec<u8>, StubFactory> {
        let ring = ManyToOneRingBuffer::new(vec![
            0u8;
            4096 + ringbuffer::buffer_descriptor::TRAILER_LENGTH
                as usize
        ])
        .unwrap();
        let receiver = CopyBroadcastReceiver::new(
            BroadcastReceiver::new(vec![
                0u8;
                1024 + broadcast::buffer_descriptor::TRAILER_LENGTH
                    as usize
            ])
            .unwrap(),
        );
        let counters = CountersReader::new(vec![0u8; 16 * crate::counters::COUNTER_LENGTH as usize]);

        let context = ClientContext::default()
            .set_nano_clock(Box::new(CachedNanoClock::new()))
            .set_epoch_clock(Box::new(CachedEpochClock::new()));

        ClientConductor::new(
            context,
            DriverProxy::new(ring),
            DriverEventsAdapter::new(receiver),
            counters,
            StubFactory {
                maps_performed: Rc::new(Cell::new(0)),
            },
        )
    }

    #[test]
    fn add_counter_validates_key_and_label_lengths() {
        let mut conductor = test_conductor();

        let oversized_key = vec![0u8; MAX_KEY_LENGTH as usize + 1];
        assert_eq!(
            conductor.add_counter(1, &oversized_key, "label").err(),
            Some(BusError::IllegalArgument)
        );

        let oversized_label = "x".repeat(MAX_LABEL_LENGTH as usize + 1);
        assert_eq!(
            conductor.add_counter(1, &[], &oversized_label).err(),
            Some(BusError::IllegalArgument)
        );
    }

    #[test]
    fn api_calls_observe_closed_state() {
        let mut conductor = test_conductor();
        conductor.close().unwrap();

        assert_eq!(
            conductor.add_publication("bus:ipc", 1).err(),
            Some(BusError::ClientClosed)
        );
        assert_eq!(
            conductor.release_publication(17).err(),
            Some(BusError::ClientClosed)
        );
        assert_eq!(
            conductor.do_work().err(),
            Some(BusError::ClientClosed)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut conductor = test_conductor();
        conductor.close().unwrap();
        conductor.close().unwrap();
        assert!(conductor.is_closed());
        assert_eq!(conductor.resource_count(), 0);
    }

    #[test]
    fn release_of_unknown_registration_is_a_no_op() {
        let mut conductor = test_conductor();
        assert!(conductor.release_publication(99).is_ok());
        assert!(conductor.release_subscription(99).is_ok());
        assert!(conductor.release_counter(99).is_ok());
    }
}
