//! Configuration for the client conductor.

use std::env;
use std::path::PathBuf;

use log::error;

use crate::concurrent::agent::{Agent, AgentInvoker};
use crate::concurrent::clock::{EpochClock, NanoClock, SystemEpochClock, SystemNanoClock};

pub use crate::util::ErrorHandler;

/// Client to driver heartbeat cadence
pub const DEFAULT_KEEP_ALIVE_INTERVAL_NS: i64 = 500_000_000;

/// Window without a driver heartbeat before the client gives up
pub const DEFAULT_DRIVER_TIMEOUT_MS: i64 = 10_000;

/// Maximum interval between conductor work cycles before self-termination
pub const DEFAULT_INTER_SERVICE_TIMEOUT_NS: i64 = 10_000_000_000;

/// Grace window during which a released resource's backing file stays mapped
pub const DEFAULT_RESOURCE_LINGER_NS: i64 = 3_000_000_000;

/// Configuration consumed by the conductor. Values not set explicitly take
/// the defaults above; the clocks default to the system clocks and exist as
/// settings so tests can drive time by hand.
pub struct ClientContext {
    /// Directory containing the driver's command-and-control file
    pub driver_dir: PathBuf,
    /// Client to driver heartbeat cadence, nanoseconds
    pub keep_alive_interval_ns: i64,
    /// Driver liveness window, milliseconds
    pub driver_timeout_ms: i64,
    /// Conductor self-termination window, nanoseconds
    pub inter_service_timeout_ns: i64,
    /// Grace window before a released log buffer is unmapped, nanoseconds
    pub resource_linger_ns: i64,
    /// Sink for asynchronous errors
    pub error_handler: ErrorHandler,
    /// Counter cell incremented alongside every error delivered to the
    /// sink, when set
    pub error_counter_id: Option<i32>,
    /// Monotonic clock used for timeout arithmetic
    pub nano_clock: Box<dyn NanoClock + Send>,
    /// Wall clock used for driver liveness
    pub epoch_clock: Box<dyn EpochClock + Send>,
    /// When set, `await_response` drives this agent instead of parking;
    /// used when the media driver runs embedded in the client process
    pub driver_agent_invoker: Option<AgentInvoker<Box<dyn Agent + Send>>>,
}

impl ClientContext {
    fn get_user_name() -> String {
        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string())
    }

    /// Default directory used by the media driver to interact with clients
    pub fn default_driver_path() -> PathBuf {
        let base_path = if cfg!(target_os = "linux") {
            PathBuf::from("/dev/shm")
        } else {
            // Uses TMPDIR on Unix-like and GetTempPath on Windows
            env::temp_dir()
        };

        base_path.join(format!("mediabus-{}", ClientContext::get_user_name()))
    }

    /// Set the directory containing the driver's files.
    pub fn set_driver_dir(mut self, dir: PathBuf) -> Self {
        self.driver_dir = dir;
        self
    }

    /// Set the client to driver heartbeat cadence.
    pub fn set_keep_alive_interval_ns(mut self, interval_ns: i64) -> Self {
        self.keep_alive_interval_ns = interval_ns;
        self
    }

    /// Set the driver liveness window.
    pub fn set_driver_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.driver_timeout_ms = timeout_ms;
        self
    }

    /// Set the conductor self-termination window.
    pub fn set_inter_service_timeout_ns(mut self, timeout_ns: i64) -> Self {
        self.inter_service_timeout_ns = timeout_ns;
        self
    }

    /// Set the resource linger window.
    pub fn set_resource_linger_ns(mut self, linger_ns: i64) -> Self {
        self.resource_linger_ns = linger_ns;
        self
    }

    /// Set the sink for asynchronous errors.
    pub fn set_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    /// Count errors on the given counter cell as well as delivering them to
    /// the sink.
    pub fn set_error_counter_id(mut self, counter_id: i32) -> Self {
        self.error_counter_id = Some(counter_id);
        self
    }

    /// Replace the monotonic clock.
    pub fn set_nano_clock(mut self, clock: Box<dyn NanoClock + Send>) -> Self {
        self.nano_clock = clock;
        self
    }

    /// Replace the wall clock.
    pub fn set_epoch_clock(mut self, clock: Box<dyn EpochClock + Send>) -> Self {
        self.epoch_clock = clock;
        self
    }

    /// Install an embedded driver agent to be invoked while awaiting
    /// responses.
    pub fn set_driver_agent_invoker(
        mut self,
        invoker: AgentInvoker<Box<dyn Agent + Send>>,
    ) -> Self {
        self.driver_agent_invoker = Some(invoker);
        self
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        ClientContext {
            driver_dir: ClientContext::default_driver_path(),
            keep_alive_interval_ns: DEFAULT_KEEP_ALIVE_INTERVAL_NS,
            driver_timeout_ms: DEFAULT_DRIVER_TIMEOUT_MS,
            inter_service_timeout_ns: DEFAULT_INTER_SERVICE_TIMEOUT_NS,
            resource_linger_ns: DEFAULT_RESOURCE_LINGER_NS,
            error_handler: Box::new(|err| error!("conductor error: {}", err)),
            error_counter_id: None,
            nano_clock: Box::new(SystemNanoClock::new()),
            epoch_clock: Box::new(SystemEpochClock),
            driver_agent_invoker: None,
        }
    }
}
