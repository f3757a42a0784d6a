//! Conductor behavior against a scripted media-driver stub. The stub maps
//! the same command-and-control file as the client, reads commands off the
//! ring buffer, and broadcasts events back, the way the real driver does.

use std::convert::TryFrom;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mediabus::client::conductor::ClientConductor;
use mediabus::client::context::ClientContext;
use mediabus::client::log_buffers::MappedFileFactory;
use mediabus::cnc::CncFile;
use mediabus::command::events::{
    counter_ready, image_ready, operation_succeeded, publication_ready, subscription_ready,
};
use mediabus::command::request_header;
use mediabus::command::requests::publication_command;
use mediabus::concurrent::broadcast::{
    buffer_descriptor as broadcast_descriptor, BroadcastReceiver, BroadcastTransmitter,
    CopyBroadcastReceiver,
};
use mediabus::concurrent::buffer::MappedRegion;
use mediabus::concurrent::clock::{CachedEpochClock, CachedNanoClock, EpochClock, SystemEpochClock};
use mediabus::concurrent::ringbuffer::{
    buffer_descriptor as ring_descriptor, ManyToOneRingBuffer,
};
use mediabus::control_protocol::{ClientCommand, DriverEvent};
use mediabus::counters::CountersReader;
use mediabus::driver_events::DriverEventsAdapter;
use mediabus::driver_proxy::DriverProxy;
use mediabus::util::BusError;

const TO_DRIVER_LENGTH: i32 = 64 * 1024 + ring_descriptor::TRAILER_LENGTH;
const TO_CLIENTS_LENGTH: i32 = 64 * 1024 + broadcast_descriptor::TRAILER_LENGTH;
const COUNTER_VALUES_LENGTH: i32 = 16 * 1024;
const ERROR_LOG_LENGTH: i32 = 4 * 1024;
const LOG_FILE_LENGTH: u64 = 64 * 1024;

#[derive(Clone, Default)]
struct StubBehavior {
    /// Never acknowledge subscription registrations
    ignore_subscriptions: bool,
    /// Acknowledge every publication with one fixed registration id and
    /// log file, as the driver does when publications share a log
    shared_log_registration_id: Option<i64>,
    /// Send an available-image event before the subscription-ready event
    image_before_subscription_ack: bool,
}

/// Scripted driver: consumes the command buffer and broadcasts responses.
struct DriverStub {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DriverStub {
    fn start(dir: &Path, behavior: StubBehavior) -> Self {
        let cnc = CncFile::map_existing(dir).unwrap();
        let mut to_driver = ManyToOneRingBuffer::new(cnc.to_driver).unwrap();
        let mut to_clients = BroadcastTransmitter::new(cnc.to_clients).unwrap();
        let log_dir = dir.to_path_buf();

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("driver-stub".to_string())
            .spawn(move || {
                while !shutdown_flag.load(Ordering::Acquire) {
                    to_driver.update_consumer_heartbeat_time(SystemEpochClock.time_ms());
                    to_driver
                        .read(|msg_type, body| {
                            respond(&behavior, &log_dir, &mut to_clients, msg_type, body)
                        })
                        .unwrap();
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();

        DriverStub {
            shutdown,
            thread: Some(thread),
        }
    }
}

impl Drop for DriverStub {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn create_log_file(dir: &Path, registration_id: i64) -> String {
    let path = dir.join(format!("log-{}.logbuffer", registration_id));
    if !path.exists() {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .unwrap();
        file.set_len(LOG_FILE_LENGTH).unwrap();
    }
    path.to_str().unwrap().to_string()
}

fn respond(
    behavior: &StubBehavior,
    log_dir: &PathBuf,
    to_clients: &mut BroadcastTransmitter<MappedRegion>,
    msg_type: i32,
    body: &[u8],
) {
    let command = match ClientCommand::try_from(msg_type) {
        Ok(command) => command,
        Err(()) => return,
    };

    // Every command leads with the request header
    let frame = body.to_vec();
    let correlation_id = request_header::correlation_id(&frame).unwrap();

    match command {
        ClientCommand::AddPublication | ClientCommand::AddExclusivePublication => {
            let registration_id = behavior
                .shared_log_registration_id
                .unwrap_or(correlation_id);
            let log_file = create_log_file(log_dir, registration_id);

            let mut encoded = vec![0u8; 256];
            let length = publication_ready::encode(
                &mut encoded,
                correlation_id,
                registration_id,
                1,
                publication_command::stream_id(&frame).unwrap(),
                3,
                4,
                &log_file,
            )
            .unwrap();

            let event_type = if command == ClientCommand::AddPublication {
                DriverEvent::OnPublicationReady
            } else {
                DriverEvent::OnExclusivePublicationReady
            };
            to_clients
                .transmit(event_type as i32, &encoded[..length as usize])
                .unwrap();
        }
        ClientCommand::AddSubscription => {
            if behavior.ignore_subscriptions {
                return;
            }

            if behavior.image_before_subscription_ack {
                transmit_available_image(log_dir, to_clients, correlation_id);
            }

            let mut encoded = vec![0u8; subscription_ready::LENGTH as usize];
            let length = subscription_ready::encode(&mut encoded, correlation_id, 5).unwrap();
            to_clients
                .transmit(
                    DriverEvent::OnSubscriptionReady as i32,
                    &encoded[..length as usize],
                )
                .unwrap();
        }
        ClientCommand::AddCounter => {
            let mut encoded = vec![0u8; counter_ready::LENGTH as usize];
            let length = counter_ready::encode(&mut encoded, correlation_id, 7).unwrap();
            to_clients
                .transmit(DriverEvent::OnCounterReady as i32, &encoded[..length as usize])
                .unwrap();
        }
        ClientCommand::RemovePublication
        | ClientCommand::RemoveSubscription
        | ClientCommand::RemoveCounter
        | ClientCommand::AddDestination
        | ClientCommand::RemoveDestination => {
            let mut encoded = vec![0u8; operation_succeeded::LENGTH as usize];
            let length = operation_succeeded::encode(&mut encoded, correlation_id).unwrap();
            to_clients
                .transmit(
                    DriverEvent::OnOperationSuccess as i32,
                    &encoded[..length as usize],
                )
                .unwrap();
        }
        ClientCommand::ClientKeepalive | ClientCommand::ClientClose => {}
    }
}

fn transmit_available_image(
    log_dir: &PathBuf,
    to_clients: &mut BroadcastTransmitter<MappedRegion>,
    subscription_registration_id: i64,
) {
    let image_correlation_id = subscription_registration_id + 1_000;
    let log_file = create_log_file(log_dir, image_correlation_id);

    let mut encoded = vec![0u8; 256];
    let length = image_ready::encode(
        &mut encoded,
        image_correlation_id,
        subscription_registration_id,
        11,
        6,
        &log_file,
        "192.168.0.9:40123",
    )
    .unwrap();
    to_clients
        .transmit(DriverEvent::OnAvailableImage as i32, &encoded[..length as usize])
        .unwrap();
}

struct Fixture {
    // Declaration order doubles as drop order: the stub thread goes down
    // before the directory it maps
    _stub: DriverStub,
    _dir: tempfile::TempDir,
    conductor: ClientConductor<MappedRegion, MappedFileFactory>,
    nano_clock: CachedNanoClock,
    _epoch_clock: CachedEpochClock,
}

/// Conductor with manual clocks, so tests drive linger and service windows
/// by hand while `await_response` stays patient.
fn fixture(behavior: StubBehavior) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    CncFile::create_new(
        dir.path(),
        TO_DRIVER_LENGTH,
        TO_CLIENTS_LENGTH,
        COUNTER_VALUES_LENGTH,
        ERROR_LOG_LENGTH,
        10_000,
    )
    .unwrap();

    let stub = DriverStub::start(dir.path(), behavior);

    let nano_clock = CachedNanoClock::new();
    let epoch_clock = CachedEpochClock::new();
    let context = ClientContext::default()
        .set_driver_dir(dir.path().to_path_buf())
        .set_nano_clock(Box::new(nano_clock.clone()))
        .set_epoch_clock(Box::new(epoch_clock.clone()));

    let cnc = CncFile::map_existing(dir.path()).unwrap();
    let conductor = ClientConductor::new(
        context,
        DriverProxy::new(ManyToOneRingBuffer::new(cnc.to_driver).unwrap()),
        DriverEventsAdapter::new(CopyBroadcastReceiver::new(
            BroadcastReceiver::new(cnc.to_clients).unwrap(),
        )),
        CountersReader::new(cnc.counter_values),
        MappedFileFactory,
    );

    Fixture {
        _stub: stub,
        _dir: dir,
        conductor,
        nano_clock,
        _epoch_clock: epoch_clock,
    }
}

#[test]
fn happy_path_registration() {
    let mut f = fixture(StubBehavior::default());

    let publication = f
        .conductor
        .add_publication("bus:udp?endpoint=localhost:40123", 7)
        .unwrap();

    assert_eq!(publication.channel(), "bus:udp?endpoint=localhost:40123");
    assert_eq!(publication.stream_id(), 7);
    assert_eq!(publication.registration_id(), publication.original_registration_id());
    assert!(!publication.is_closed());

    assert_eq!(f.conductor.resource_count(), 1);
    assert_eq!(f.conductor.mapped_log_count(), 1);
    assert_eq!(
        f.conductor.log_buffer_refcount(publication.original_registration_id()),
        1
    );
}

#[test]
fn shared_publications_return_the_same_resource() {
    let mut f = fixture(StubBehavior::default());

    let first = f.conductor.add_publication("bus:udp?endpoint=localhost:40123", 7).unwrap();
    let second = f.conductor.add_publication("bus:udp?endpoint=localhost:40123", 7).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(f.conductor.resource_count(), 1);

    // A different stream is a different publication
    let third = f.conductor.add_publication("bus:udp?endpoint=localhost:40123", 8).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn exclusive_publications_are_always_distinct() {
    let mut f = fixture(StubBehavior::default());

    let first = f
        .conductor
        .add_exclusive_publication("bus:udp?endpoint=localhost:40123", 7)
        .unwrap();
    let second = f
        .conductor
        .add_exclusive_publication("bus:udp?endpoint=localhost:40123", 7)
        .unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.registration_id(), second.registration_id());
    assert_eq!(f.conductor.resource_count(), 2);
}

#[test]
fn correlation_ids_are_never_reused() {
    let mut f = fixture(StubBehavior::default());

    let mut ids = Vec::new();
    for stream_id in 0..4 {
        ids.push(
            f.conductor
                .add_exclusive_publication("bus:ipc", stream_id)
                .unwrap()
                .registration_id(),
        );
    }
    ids.push(
        f.conductor
            .add_subscription("bus:ipc", 9)
            .unwrap()
            .registration_id(),
    );

    let mut deduped = ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), ids.len());
}

#[test]
fn driver_timeout_when_subscription_is_never_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    CncFile::create_new(
        dir.path(),
        TO_DRIVER_LENGTH,
        TO_CLIENTS_LENGTH,
        COUNTER_VALUES_LENGTH,
        ERROR_LOG_LENGTH,
        10_000,
    )
    .unwrap();
    let _stub = DriverStub::start(
        dir.path(),
        StubBehavior {
            ignore_subscriptions: true,
            ..StubBehavior::default()
        },
    );

    // Real clocks and a short timeout: the call must fail on its own
    let context = ClientContext::default()
        .set_driver_dir(dir.path().to_path_buf())
        .set_driver_timeout_ms(200);

    let cnc = CncFile::map_existing(dir.path()).unwrap();
    let mut conductor = ClientConductor::new(
        context,
        DriverProxy::new(ManyToOneRingBuffer::new(cnc.to_driver).unwrap()),
        DriverEventsAdapter::new(CopyBroadcastReceiver::new(
            BroadcastReceiver::new(cnc.to_clients).unwrap(),
        )),
        CountersReader::new(cnc.counter_values),
        MappedFileFactory,
    );

    let started = Instant::now();
    let result = conductor.add_subscription("bus:udp?endpoint=localhost:40124", 5);
    let elapsed = started.elapsed();

    assert_eq!(result.err(), Some(BusError::DriverTimeout(200)));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(2_000));
    // The abandoned subscription shell must not leak
    assert_eq!(conductor.resource_count(), 0);
}

#[test]
fn released_shared_log_lingers_then_is_freed() {
    let mut f = fixture(StubBehavior {
        shared_log_registration_id: Some(1_000),
        ..StubBehavior::default()
    });

    // Two publications over one driver-assigned log
    let first = f.conductor.add_publication("bus:udp?endpoint=localhost:40123", 1).unwrap();
    let second = f.conductor.add_publication("bus:udp?endpoint=localhost:40123", 2).unwrap();
    assert_eq!(first.original_registration_id(), 1_000);
    assert_eq!(f.conductor.log_buffer_refcount(1_000), 2);

    f.conductor.release_publication(first.registration_id()).unwrap();
    assert_eq!(f.conductor.log_buffer_refcount(1_000), 1);

    f.conductor.release_publication(second.registration_id()).unwrap();
    assert_eq!(f.conductor.log_buffer_refcount(1_000), 0);
    assert_eq!(f.conductor.lingering_log_count(), 1);

    // Inside the linger window nothing is freed
    f.nano_clock.advance(1_100_000_000);
    f.conductor.do_work().unwrap();
    assert_eq!(f.conductor.lingering_log_count(), 1);

    // Past 3s the sweep releases the mapping
    f.nano_clock.advance(2_100_000_000);
    f.conductor.do_work().unwrap();
    assert_eq!(f.conductor.lingering_log_count(), 0);
}

#[test]
fn force_close_is_idempotent() {
    let mut f = fixture(StubBehavior::default());

    f.conductor.add_publication("bus:ipc", 1).unwrap();
    f.conductor.add_subscription("bus:ipc", 2).unwrap();
    assert_eq!(f.conductor.resource_count(), 2);

    f.conductor.close().unwrap();
    assert!(f.conductor.is_closed());
    assert_eq!(f.conductor.resource_count(), 0);
    assert_eq!(f.conductor.lingering_log_count(), 0);

    f.conductor.close().unwrap();
    assert_eq!(f.conductor.resource_count(), 0);
    assert_eq!(f.conductor.lingering_log_count(), 0);

    assert_eq!(
        f.conductor.add_publication("bus:ipc", 1).err(),
        Some(BusError::ClientClosed)
    );
}

#[test]
fn registry_returns_to_empty_after_add_release_sequences() {
    let mut f = fixture(StubBehavior::default());

    let publication = f.conductor.add_exclusive_publication("bus:ipc", 1).unwrap();
    let subscription = f.conductor.add_subscription("bus:ipc", 2).unwrap();
    let counter = f.conductor.add_counter(9, &[1, 2], "requests").unwrap();
    assert_eq!(f.conductor.resource_count(), 3);

    f.conductor.release_counter(counter.registration_id()).unwrap();
    f.conductor.release_subscription(subscription.registration_id()).unwrap();
    f.conductor.release_publication(publication.registration_id()).unwrap();

    assert_eq!(f.conductor.resource_count(), 0);
    assert_eq!(f.conductor.mapped_log_count(), 0);
    assert_eq!(
        f.conductor.log_buffer_refcount(publication.original_registration_id()),
        0
    );
}

#[test]
fn available_image_can_arrive_before_subscription_ack() {
    let mut f = fixture(StubBehavior {
        image_before_subscription_ack: false,
        ..StubBehavior::default()
    });

    // First the ordinary ordering, image after acknowledgement
    let images: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&images);
    let subscription = f
        .conductor
        .add_subscription_with_handlers(
            "bus:udp?endpoint=localhost:40125",
            5,
            Some(Box::new(move |image| {
                seen.lock().unwrap().push(image.correlation_id());
            })),
            None,
        )
        .unwrap();
    assert_eq!(subscription.image_count(), 0);

    drop(f);

    // Now the adversarial ordering, image first
    let mut f = fixture(StubBehavior {
        image_before_subscription_ack: true,
        ..StubBehavior::default()
    });

    let images: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&images);
    let subscription = f
        .conductor
        .add_subscription_with_handlers(
            "bus:udp?endpoint=localhost:40125",
            5,
            Some(Box::new(move |image| {
                seen.lock().unwrap().push(image.correlation_id());
            })),
            None,
        )
        .unwrap();

    assert_eq!(subscription.image_count(), 1);
    let expected_image_id = subscription.registration_id() + 1_000;
    assert_eq!(*images.lock().unwrap(), vec![expected_image_id]);
    assert!(subscription.channel_status_id() >= 0);
    assert_eq!(f.conductor.log_buffer_refcount(expected_image_id), 1);
}

#[test]
fn counter_round_trip_and_validation() {
    let mut f = fixture(StubBehavior::default());

    let counter = f.conductor.add_counter(9, &[1, 2, 3], "ingress-errors").unwrap();
    assert_eq!(counter.counter_id(), 7);

    counter.set_ordered(41).unwrap();
    assert_eq!(counter.get(), Ok(41));

    let oversized_key = vec![0u8; 200];
    assert_eq!(
        f.conductor.add_counter(9, &oversized_key, "label").err(),
        Some(BusError::IllegalArgument)
    );

    f.conductor.release_counter(counter.registration_id()).unwrap();
    assert!(counter.is_closed());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy)]
    enum AddAction {
        SharedPublication,
        ExclusivePublication,
        Subscription,
        Counter,
    }

    fn add_action() -> impl Strategy<Value = AddAction> {
        prop_oneof![
            Just(AddAction::SharedPublication),
            Just(AddAction::ExclusivePublication),
            Just(AddAction::Subscription),
            Just(AddAction::Counter),
        ]
    }

    proptest! {
        // Each case spins up a scripted driver, so keep the case count low
        #![proptest_config(ProptestConfig::with_cases(8))]

        /// Any sequence of adds followed by releasing everything returns
        /// the registry to empty with no mapped or lingering logs left
        /// behind once the linger window passes.
        #[test]
        fn add_release_sequences_return_registry_to_empty(
            actions in proptest::collection::vec(add_action(), 1..5)
        ) {
            let mut f = fixture(StubBehavior::default());

            let mut registration_ids = Vec::new();
            for (index, action) in actions.iter().enumerate() {
                let stream_id = index as i32;
                let registration_id = match action {
                    AddAction::SharedPublication => f
                        .conductor
                        .add_publication("bus:ipc?alias=prop", stream_id)
                        .unwrap()
                        .registration_id(),
                    AddAction::ExclusivePublication => f
                        .conductor
                        .add_exclusive_publication("bus:ipc?alias=prop", stream_id)
                        .unwrap()
                        .registration_id(),
                    AddAction::Subscription => f
                        .conductor
                        .add_subscription("bus:ipc?alias=prop", stream_id)
                        .unwrap()
                        .registration_id(),
                    AddAction::Counter => f
                        .conductor
                        .add_counter(1, &[], "prop")
                        .unwrap()
                        .registration_id(),
                };
                registration_ids.push((*action, registration_id));
            }

            // No two resources ever share a correlation id
            let mut ids: Vec<i64> =
                registration_ids.iter().map(|(_, id)| *id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), registration_ids.len());

            for (action, registration_id) in registration_ids {
                match action {
                    AddAction::SharedPublication | AddAction::ExclusivePublication => {
                        f.conductor.release_publication(registration_id).unwrap()
                    }
                    AddAction::Subscription => {
                        f.conductor.release_subscription(registration_id).unwrap()
                    }
                    AddAction::Counter => {
                        f.conductor.release_counter(registration_id).unwrap()
                    }
                }
            }

            prop_assert_eq!(f.conductor.resource_count(), 0);
            prop_assert_eq!(f.conductor.mapped_log_count(), 0);

            // Within RESOURCE_LINGER + RESOURCE_CHECK_INTERVAL every
            // refcount has reached zero and the mappings are gone
            f.nano_clock.advance(3_000_000_000 + 1_100_000_000);
            f.conductor.do_work().unwrap();
            prop_assert_eq!(f.conductor.lingering_log_count(), 0);
        }
    }
}

#[test]
fn destination_commands_complete() {
    let mut f = fixture(StubBehavior::default());

    let publication = f.conductor.add_publication("bus:udp?control=localhost:40200", 3).unwrap();
    f.conductor
        .add_destination(publication.registration_id(), "bus:udp?endpoint=localhost:40201")
        .unwrap();
    f.conductor
        .remove_destination(publication.registration_id(), "bus:udp?endpoint=localhost:40201")
        .unwrap();
}
