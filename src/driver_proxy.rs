//! High level API for issuing commands to the media driver. Every mutating
//! call mints a fresh correlation id from the command buffer and returns it
//! so the conductor can match the driver's response.

use crate::command::request_header;
use crate::command::requests::{
    counter_command, destination_command, publication_command, remove_command,
    subscription_command,
};
use crate::concurrent::ringbuffer::ManyToOneRingBuffer;
use crate::concurrent::AtomicBuffer;
use crate::control_protocol::ClientCommand;
use crate::util::{BusError, IndexT, Result};

const COMMAND_BUFFER_SIZE: usize = 1024;

/// Proxy for the command side of the driver transport.
pub struct DriverProxy<A>
where
    A: AtomicBuffer,
{
    to_driver: ManyToOneRingBuffer<A>,
    client_id: i64,
}

impl<A> DriverProxy<A>
where
    A: AtomicBuffer,
{
    /// Initialize a driver proxy over the to-driver command buffer.
    pub fn new(to_driver: ManyToOneRingBuffer<A>) -> Self {
        let client_id = to_driver.next_correlation_id();
        DriverProxy {
            to_driver,
            client_id,
        }
    }

    /// Timestamp of the most recent driver heartbeat, epoch milliseconds.
    pub fn time_of_last_driver_keepalive_ms(&self) -> i64 {
        self.to_driver.consumer_heartbeat_time()
    }

    /// Unique identifier associated with this client.
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Request a new publication on `channel` and `stream_id`.
    pub fn add_publication(&mut self, channel: &str, stream_id: i32) -> Result<i64> {
        self.send_publication_command(ClientCommand::AddPublication, channel, stream_id)
    }

    /// Request a new exclusive publication on `channel` and `stream_id`.
    pub fn add_exclusive_publication(&mut self, channel: &str, stream_id: i32) -> Result<i64> {
        self.send_publication_command(ClientCommand::AddExclusivePublication, channel, stream_id)
    }

    /// Request removal of the publication registered under
    /// `registration_id`. Removal commands are idempotent at this layer.
    pub fn remove_publication(&mut self, registration_id: i64) -> Result<i64> {
        self.send_remove_command(ClientCommand::RemovePublication, registration_id)
    }

    /// Request a new subscription on `channel` and `stream_id`.
    pub fn add_subscription(&mut self, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let mut scratch = &mut [0u8; COMMAND_BUFFER_SIZE][..];
        let length = subscription_command::encode(
            &mut scratch,
            self.client_id,
            correlation_id,
            request_header::NO_CORRELATION_ID,
            stream_id,
            channel,
        )?;
        self.write_command(ClientCommand::AddSubscription, &scratch, length)?;
        Ok(correlation_id)
    }

    /// Request removal of the subscription registered under
    /// `registration_id`.
    pub fn remove_subscription(&mut self, registration_id: i64) -> Result<i64> {
        self.send_remove_command(ClientCommand::RemoveSubscription, registration_id)
    }

    /// Request a new counter of `type_id` with the supplied key and label.
    pub fn add_counter(&mut self, type_id: i32, key: &[u8], label: &str) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let mut scratch = &mut [0u8; COMMAND_BUFFER_SIZE][..];
        let length = counter_command::encode(
            &mut scratch,
            self.client_id,
            correlation_id,
            type_id,
            key,
            label,
        )?;
        self.write_command(ClientCommand::AddCounter, &scratch, length)?;
        Ok(correlation_id)
    }

    /// Request removal of the counter registered under `registration_id`.
    pub fn remove_counter(&mut self, registration_id: i64) -> Result<i64> {
        self.send_remove_command(ClientCommand::RemoveCounter, registration_id)
    }

    /// Add a destination to the publication registered under
    /// `publication_registration_id`.
    pub fn add_destination(
        &mut self,
        publication_registration_id: i64,
        channel: &str,
    ) -> Result<i64> {
        self.send_destination_command(
            ClientCommand::AddDestination,
            publication_registration_id,
            channel,
        )
    }

    /// Remove a destination from the publication registered under
    /// `publication_registration_id`.
    pub fn remove_destination(
        &mut self,
        publication_registration_id: i64,
        channel: &str,
    ) -> Result<i64> {
        self.send_destination_command(
            ClientCommand::RemoveDestination,
            publication_registration_id,
            channel,
        )
    }

    /// Fire-and-forget heartbeat telling the driver this client is alive.
    pub fn send_client_keepalive(&mut self) -> Result<()> {
        self.send_bare_header(ClientCommand::ClientKeepalive)
    }

    /// Tell the driver this client is closing and its resources can be
    /// reclaimed.
    pub fn send_client_close(&mut self) -> Result<()> {
        self.send_bare_header(ClientCommand::ClientClose)
    }

    fn send_publication_command(
        &mut self,
        command: ClientCommand,
        channel: &str,
        stream_id: i32,
    ) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let mut scratch = &mut [0u8; COMMAND_BUFFER_SIZE][..];
        let length = publication_command::encode(
            &mut scratch,
            self.client_id,
            correlation_id,
            stream_id,
            channel,
        )?;
        self.write_command(command, &scratch, length)?;
        Ok(correlation_id)
    }

    fn send_remove_command(&mut self, command: ClientCommand, registration_id: i64) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let mut scratch = &mut [0u8; remove_command::LENGTH as usize][..];
        let length = remove_command::encode(
            &mut scratch,
            self.client_id,
            correlation_id,
            registration_id,
        )?;
        self.write_command(command, &scratch, length)?;
        Ok(correlation_id)
    }

    fn send_destination_command(
        &mut self,
        command: ClientCommand,
        registration_id: i64,
        channel: &str,
    ) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let mut scratch = &mut [0u8; COMMAND_BUFFER_SIZE][..];
        let length = destination_command::encode(
            &mut scratch,
            self.client_id,
            correlation_id,
            registration_id,
            channel,
        )?;
        self.write_command(command, &scratch, length)?;
        Ok(correlation_id)
    }

    fn send_bare_header(&mut self, command: ClientCommand) -> Result<()> {
        let mut scratch = &mut [0u8; request_header::LENGTH as usize][..];
        let length = request_header::encode(
            &mut scratch,
            self.client_id,
            request_header::NO_CORRELATION_ID,
        )?;
        self.write_command(command, &scratch, length)
    }

    fn write_command<B>(&mut self, command: ClientCommand, source: &B, length: IndexT) -> Result<()>
    where
        B: AtomicBuffer,
    {
        if !self.to_driver.write(command as i32, source, 0, length)? {
            Err(BusError::IllegalState)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::DriverProxy;
    use crate::command::request_header;
    use crate::command::requests::publication_command;
    use crate::concurrent::ringbuffer::{buffer_descriptor, ManyToOneRingBuffer};
    use crate::control_protocol::ClientCommand;

    const BUFFER_SIZE: usize = 4096 + buffer_descriptor::TRAILER_LENGTH as usize;

    #[test]
    fn add_publication_frames_command() {
        let ring = ManyToOneRingBuffer::new(vec![0u8; BUFFER_SIZE]).unwrap();
        let mut proxy = DriverProxy::new(ring);
        let client_id = proxy.client_id();

        let correlation_id = proxy
            .add_publication("bus:udp?endpoint=localhost:40123", 7)
            .unwrap();

        let mut seen = None;
        proxy
            .to_driver
            .read(|msg_type, body| {
                let frame = body.to_vec();
                seen = Some((
                    ClientCommand::try_from(msg_type).unwrap(),
                    request_header::client_id(&frame).unwrap(),
                    request_header::correlation_id(&frame).unwrap(),
                    publication_command::stream_id(&frame).unwrap(),
                    publication_command::channel(&frame).unwrap().to_string(),
                ));
            })
            .unwrap();

        assert_eq!(
            seen,
            Some((
                ClientCommand::AddPublication,
                client_id,
                correlation_id,
                7,
                "bus:udp?endpoint=localhost:40123".to_string()
            ))
        );
    }

    #[test]
    fn keepalive_is_a_bare_header() {
        let ring = ManyToOneRingBuffer::new(vec![0u8; BUFFER_SIZE]).unwrap();
        let mut proxy = DriverProxy::new(ring);
        let client_id = proxy.client_id();

        proxy.send_client_keepalive().unwrap();

        let mut seen = None;
        proxy
            .to_driver
            .read(|msg_type, body| {
                let frame = body.to_vec();
                seen = Some((
                    ClientCommand::try_from(msg_type).unwrap(),
                    request_header::client_id(&frame).unwrap(),
                    request_header::correlation_id(&frame).unwrap(),
                    body.len(),
                ));
            })
            .unwrap();

        assert_eq!(
            seen,
            Some((
                ClientCommand::ClientKeepalive,
                client_id,
                request_header::NO_CORRELATION_ID,
                request_header::LENGTH as usize
            ))
        );
    }

    #[test]
    fn every_command_mints_a_fresh_correlation_id() {
        let ring = ManyToOneRingBuffer::new(vec![0u8; BUFFER_SIZE]).unwrap();
        let mut proxy = DriverProxy::new(ring);

        let first = proxy.add_publication("bus:ipc", 1).unwrap();
        let second = proxy.add_subscription("bus:ipc", 1).unwrap();
        let third = proxy.remove_publication(first).unwrap();

        assert!(first < second && second < third);
    }
}
