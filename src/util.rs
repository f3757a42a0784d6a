//! Shared helper types: buffer indices, the crate error enum, and bit
//! arithmetic used by the concurrent data structures.

use thiserror::Error;

/// Index and length type for buffer operations. Buffers in the
/// command-and-control file are laid out with 32-bit lengths, so arithmetic
/// on offsets is done in `i32` rather than `usize`.
pub type IndexT = i32;

/// Error type for all operations in this crate.
///
/// The first four variants are raised by the concurrent primitives; the rest
/// by the conductor and the cluster sequencer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    /// An argument provided is an illegal value
    #[error("illegal argument")]
    IllegalArgument,
    /// A memory access would exceed the allowable bounds
    #[error("buffer access out of bounds")]
    OutOfBounds,
    /// A buffer operation could not complete because of space constraints
    #[error("insufficient capacity")]
    InsufficientCapacity,
    /// An invalid state was reached and processing cannot continue
    #[error("illegal state")]
    IllegalState,
    /// Opening or mapping a shared file failed
    #[error("shared file error: {0}")]
    SharedFile(String),
    /// The driver rejected a registration request
    #[error("registration failed (code {code}): {message}")]
    Registration {
        /// Error code reported by the driver
        code: i32,
        /// Error message reported by the driver
        message: String,
    },
    /// The driver did not respond, or its heartbeat went stale
    #[error("no response from driver within {0} ms")]
    DriverTimeout(i64),
    /// The conductor work loop missed its own service deadline
    #[error("service interval exceeded {0} ns between invocations")]
    ServiceTimeout(i64),
    /// Asynchronous failure of a channel endpoint, keyed by status indicator
    #[error("channel endpoint error (status indicator {status_indicator_id}): {message}")]
    ChannelEndpoint {
        /// Status indicator counter id of the failed endpoint
        status_indicator_id: i32,
        /// Error message reported by the driver
        message: String,
    },
    /// An API call was made against a closed client
    #[error("client is closed")]
    ClientClosed,
    /// The cluster log publication refused an append after all retries
    #[error("unable to append event to the log")]
    UnableToAppend,
    /// A user-supplied handler panicked; the panic was caught and routed
    /// to the error sink
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
}

/// Result type for operations in this crate
pub type Result<T> = ::std::result::Result<T, BusError>;

/// Error sink invoked for asynchronous failures.
pub type ErrorHandler = Box<dyn FnMut(&BusError) + Send>;

/// Bit-level utility functions
pub mod bit {
    use crate::util::IndexT;

    /// Length of the data blocks used by the CPU cache sub-system in bytes
    pub const CACHE_LINE_LENGTH: usize = 64;

    /// Quick check that an `IndexT` is a positive power of two
    ///
    /// ```rust
    /// # use mediabus::util::bit::is_power_of_two;
    /// assert!(is_power_of_two(1024));
    /// assert!(!is_power_of_two(1000));
    /// ```
    pub fn is_power_of_two(idx: IndexT) -> bool {
        idx > 0 && (idx as u32).is_power_of_two()
    }

    /// Align a `usize` value up to the next multiple of a power-of-two
    /// alignment.
    ///
    /// ```rust
    /// # use mediabus::util::bit::align;
    /// assert_eq!(align(13, 8), 16);
    /// assert_eq!(align(16, 8), 16);
    /// ```
    pub const fn align(val: usize, alignment: usize) -> usize {
        (val + (alignment - 1)) & !(alignment - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::BusError;

    #[test]
    fn errors_display_driver_detail() {
        let err = BusError::Registration {
            code: 11,
            message: "invalid channel".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "registration failed (code 11): invalid channel"
        );
    }
}
