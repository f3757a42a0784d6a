//! Adapter draining the driver's event broadcast and dispatching decoded
//! events to the conductor.

use std::convert::TryFrom;

use crate::command::events::{
    counter_ready, error_response, image_ready, image_unavailable, operation_succeeded,
    publication_ready, subscription_ready,
};
use crate::concurrent::broadcast::CopyBroadcastReceiver;
use crate::concurrent::AtomicBuffer;
use crate::control_protocol::{DriverEvent, ERROR_CODE_CHANNEL_ENDPOINT_ERROR};
use crate::util::Result;

/// Fields of a publication-ready driver event, shared and exclusive alike.
pub struct PublicationReady<'a> {
    /// Correlation id of the command being acknowledged
    pub correlation_id: i64,
    /// Driver-assigned registration id; differs from the correlation id
    /// when the driver satisfied the command from an existing publication
    pub registration_id: i64,
    /// Session id assigned to the publication
    pub session_id: i32,
    /// Stream id of the publication
    pub stream_id: i32,
    /// Counter id of the publication limit position
    pub publication_limit_counter_id: i32,
    /// Counter id of the channel status indicator, or the no-id sentinel
    pub channel_status_indicator_id: i32,
    /// Path of the log file backing the publication
    pub log_file: &'a str,
}

/// Fields of an available-image driver event.
pub struct ImageReady<'a> {
    /// Correlation id identifying the image
    pub correlation_id: i64,
    /// Registration id of the owning subscription
    pub subscription_registration_id: i64,
    /// Session id of the remote publication
    pub session_id: i32,
    /// Counter id of the subscriber position
    pub subscriber_position_id: i32,
    /// Path of the log file backing the image
    pub log_file: &'a str,
    /// Transport-specific identity of the source
    pub source_identity: &'a str,
}

/// Capability set the conductor exposes to the events adapter.
pub trait DriverEventHandler {
    /// A publication registration was acknowledged.
    fn on_new_publication(&mut self, event: &PublicationReady<'_>);

    /// An exclusive publication registration was acknowledged.
    fn on_new_exclusive_publication(&mut self, event: &PublicationReady<'_>);

    /// A subscription registration was acknowledged.
    fn on_new_subscription(&mut self, correlation_id: i64, channel_status_indicator_id: i32);

    /// A counter registration was acknowledged.
    fn on_new_counter(&mut self, correlation_id: i64, counter_id: i32);

    /// An operation with no dedicated response body completed.
    fn on_operation_success(&mut self, correlation_id: i64);

    /// An image became available on a subscription.
    fn on_available_image(&mut self, event: &ImageReady<'_>);

    /// An image became unavailable on a subscription.
    fn on_unavailable_image(&mut self, correlation_id: i64, subscription_registration_id: i64);

    /// The driver reported a failure for a specific command.
    fn on_error(&mut self, correlation_id: i64, code: i32, message: &str);

    /// A channel endpoint failed asynchronously, keyed by its status
    /// indicator id.
    fn on_channel_endpoint_error(&mut self, status_indicator_id: i32, message: &str);
}

/// Drains the to-clients broadcast buffer, decoding each event and
/// dispatching it to a [`DriverEventHandler`].
pub struct DriverEventsAdapter<A>
where
    A: AtomicBuffer,
{
    receiver: CopyBroadcastReceiver<A>,
    last_received_correlation_id: i64,
}

impl<A> DriverEventsAdapter<A>
where
    A: AtomicBuffer,
{
    /// Wrap the to-clients broadcast receiver.
    pub fn new(receiver: CopyBroadcastReceiver<A>) -> Self {
        DriverEventsAdapter {
            receiver,
            last_received_correlation_id: -1,
        }
    }

    /// Correlation id of the most recent command acknowledgement seen.
    /// Image events do not move this; they are asynchronous and carry the
    /// subscription's registration id instead.
    pub fn last_received_correlation_id(&self) -> i64 {
        self.last_received_correlation_id
    }

    /// Receive at most one event and dispatch it. Returns the number of
    /// events consumed.
    pub fn receive(&mut self, handler: &mut dyn DriverEventHandler) -> Result<i32> {
        let mut last_correlation_id = self.last_received_correlation_id;
        let mut decode_result: Result<()> = Ok(());

        let messages = self.receiver.receive(|msg_type_id, body| {
            decode_result = dispatch(msg_type_id, body, handler, &mut last_correlation_id);
        })?;

        decode_result?;
        self.last_received_correlation_id = last_correlation_id;
        Ok(messages)
    }
}

fn dispatch(
    msg_type_id: i32,
    body: &mut [u8],
    handler: &mut dyn DriverEventHandler,
    last_correlation_id: &mut i64,
) -> Result<()> {
    let event = match DriverEvent::try_from(msg_type_id) {
        Ok(event) => event,
        // Unknown event types are skipped so old clients survive newer
        // drivers
        Err(()) => return Ok(()),
    };

    match event {
        DriverEvent::OnPublicationReady | DriverEvent::OnExclusivePublicationReady => {
            let ready = PublicationReady {
                correlation_id: publication_ready::correlation_id(&body)?,
                registration_id: publication_ready::registration_id(&body)?,
                session_id: publication_ready::session_id(&body)?,
                stream_id: publication_ready::stream_id(&body)?,
                publication_limit_counter_id: publication_ready::publication_limit_counter_id(
                    &body,
                )?,
                channel_status_indicator_id: publication_ready::channel_status_indicator_id(&body)?,
                log_file: publication_ready::log_file(&body)?,
            };
            if event == DriverEvent::OnPublicationReady {
                handler.on_new_publication(&ready);
            } else {
                handler.on_new_exclusive_publication(&ready);
            }
            *last_correlation_id = ready.correlation_id;
        }
        DriverEvent::OnSubscriptionReady => {
            let correlation_id = subscription_ready::correlation_id(&body)?;
            handler.on_new_subscription(
                correlation_id,
                subscription_ready::channel_status_indicator_id(&body)?,
            );
            *last_correlation_id = correlation_id;
        }
        DriverEvent::OnCounterReady => {
            let correlation_id = counter_ready::correlation_id(&body)?;
            handler.on_new_counter(correlation_id, counter_ready::counter_id(&body)?);
            *last_correlation_id = correlation_id;
        }
        DriverEvent::OnOperationSuccess => {
            let correlation_id = operation_succeeded::correlation_id(&body)?;
            handler.on_operation_success(correlation_id);
            *last_correlation_id = correlation_id;
        }
        DriverEvent::OnAvailableImage => {
            let ready = ImageReady {
                correlation_id: image_ready::correlation_id(&body)?,
                subscription_registration_id: image_ready::subscription_registration_id(&body)?,
                session_id: image_ready::session_id(&body)?,
                subscriber_position_id: image_ready::subscriber_position_id(&body)?,
                log_file: image_ready::log_file(&body)?,
                source_identity: image_ready::source_identity(&body)?,
            };
            handler.on_available_image(&ready);
        }
        DriverEvent::OnUnavailableImage => {
            handler.on_unavailable_image(
                image_unavailable::correlation_id(&body)?,
                image_unavailable::subscription_registration_id(&body)?,
            );
        }
        DriverEvent::OnError => {
            let offending_id = error_response::offending_id(&body)?;
            let code = error_response::error_code(&body)?;
            if code == ERROR_CODE_CHANNEL_ENDPOINT_ERROR {
                handler.on_channel_endpoint_error(
                    offending_id as i32,
                    error_response::error_message(&body)?,
                );
            } else {
                handler.on_error(offending_id, code, error_response::error_message(&body)?);
                *last_correlation_id = offending_id;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DriverEventHandler, DriverEventsAdapter, ImageReady, PublicationReady};
    use crate::command::events::subscription_ready;
    use crate::concurrent::broadcast::{
        buffer_descriptor, BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver,
    };
    use crate::control_protocol::DriverEvent;

    const BUFFER_SIZE: usize = 1024 + buffer_descriptor::TRAILER_LENGTH as usize;

    #[derive(Default)]
    struct RecordingHandler {
        subscriptions: Vec<(i64, i32)>,
        errors: Vec<(i64, i32, String)>,
    }

    impl DriverEventHandler for RecordingHandler {
        fn on_new_publication(&mut self, _event: &PublicationReady<'_>) {}
        fn on_new_exclusive_publication(&mut self, _event: &PublicationReady<'_>) {}

        fn on_new_subscription(&mut self, correlation_id: i64, status_id: i32) {
            self.subscriptions.push((correlation_id, status_id));
        }

        fn on_new_counter(&mut self, _correlation_id: i64, _counter_id: i32) {}
        fn on_operation_success(&mut self, _correlation_id: i64) {}
        fn on_available_image(&mut self, _event: &ImageReady<'_>) {}
        fn on_unavailable_image(&mut self, _correlation_id: i64, _subscription_id: i64) {}

        fn on_error(&mut self, correlation_id: i64, code: i32, message: &str) {
            self.errors.push((correlation_id, code, message.to_string()));
        }

        fn on_channel_endpoint_error(&mut self, _status_indicator_id: i32, _message: &str) {}
    }

    #[test]
    fn subscription_ready_updates_last_correlation_id() {
        let mut buffer = vec![0u8; BUFFER_SIZE];

        {
            let mut encoded = vec![0u8; subscription_ready::LENGTH as usize];
            let length = subscription_ready::encode(&mut encoded, 88, 4).unwrap();

            let mut transmitter = BroadcastTransmitter::new(&mut buffer[..]).unwrap();
            transmitter
                .transmit(
                    DriverEvent::OnSubscriptionReady as i32,
                    &encoded[..length as usize],
                )
                .unwrap();
        }

        let receiver = CopyBroadcastReceiver::new(BroadcastReceiver::new(&mut buffer[..]).unwrap());
        let mut adapter = DriverEventsAdapter::new(receiver);
        assert_eq!(adapter.last_received_correlation_id(), -1);

        let mut handler = RecordingHandler::default();
        assert_eq!(adapter.receive(&mut handler).unwrap(), 1);

        assert_eq!(handler.subscriptions, vec![(88, 4)]);
        assert_eq!(adapter.last_received_correlation_id(), 88);
    }
}
