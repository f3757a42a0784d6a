//! Message type identifiers for the command-and-control protocol between
//! clients and the media driver.

/// Construct a C-compatible enum out of a set of constants, with a
/// `TryFrom<i32>` conversion for decoding message types off the wire.
macro_rules! define_enum {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {$(
            $(#[$inner:meta]),*
            $left:ident = $right:expr,
        )+}
    ) => {
        #[repr(i32)]
        #[derive(Debug, Clone, Copy, PartialEq)]
        $(#[$outer])*
        pub enum $name {$(
            $(#[$inner])*
            $left = $right,
        )*}

        impl ::std::convert::TryFrom<i32> for $name {
            type Error = ();
            fn try_from(val: i32) -> ::std::result::Result<$name, ()> {
                match val {
                    $(v if v == $name::$left as i32 => Ok($name::$left)),*,
                    _ => Err(())
                }
            }
        }
    }
}

pub(crate) use define_enum;

define_enum!(
    #[doc = "Commands sent from clients to the media driver"]
    pub enum ClientCommand {
        #[doc = "Add a publication"]
        AddPublication = 0x01,
        #[doc = "Remove a publication"]
        RemovePublication = 0x02,
        #[doc = "Add an exclusive publication"]
        AddExclusivePublication = 0x03,
        #[doc = "Add a subscription"]
        AddSubscription = 0x04,
        #[doc = "Remove a subscription"]
        RemoveSubscription = 0x05,
        #[doc = "Keepalive from a client"]
        ClientKeepalive = 0x06,
        #[doc = "Add a destination to an existing publication"]
        AddDestination = 0x07,
        #[doc = "Remove a destination from an existing publication"]
        RemoveDestination = 0x08,
        #[doc = "Add a counter to the counters manager"]
        AddCounter = 0x09,
        #[doc = "Remove a counter from the counters manager"]
        RemoveCounter = 0x0A,
        #[doc = "Close indication from a client"]
        ClientClose = 0x0B,
    }
);

define_enum!(
    #[doc = "Events broadcast from the media driver to clients"]
    pub enum DriverEvent {
        #[doc = "Error while processing a client command"]
        OnError = 0x0F01,
        #[doc = "Subscribed image buffers are available"]
        OnAvailableImage = 0x0F02,
        #[doc = "New publication buffers are ready"]
        OnPublicationReady = 0x0F03,
        #[doc = "Operation succeeded with no dedicated response body"]
        OnOperationSuccess = 0x0F04,
        #[doc = "An inactive image timed out and was removed"]
        OnUnavailableImage = 0x0F05,
        #[doc = "New exclusive publication buffers are ready"]
        OnExclusivePublicationReady = 0x0F06,
        #[doc = "New subscription is ready"]
        OnSubscriptionReady = 0x0F07,
        #[doc = "New counter is ready"]
        OnCounterReady = 0x0F08,
    }
);

/// Driver error code for a generic registration failure
pub const ERROR_CODE_GENERIC_ERROR: i32 = 0;

/// Driver error code for an invalid channel URI
pub const ERROR_CODE_INVALID_CHANNEL: i32 = 1;

/// Driver error code for an asynchronous channel endpoint failure. Error
/// responses with this code carry a status indicator id rather than a
/// correlation id.
pub const ERROR_CODE_CHANNEL_ENDPOINT_ERROR: i32 = 11;

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::{ClientCommand, DriverEvent};

    #[test]
    fn client_command_convert() {
        assert_eq!(Ok(ClientCommand::AddPublication), 0x01.try_into());
        assert_eq!(Ok(DriverEvent::OnSubscriptionReady), 0x0F07.try_into());

        let unknown: Result<ClientCommand, ()> = 0x7F.try_into();
        assert!(unknown.is_err());
    }
}
