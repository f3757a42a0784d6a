//! Client conductor and cluster sequencer for a shared-memory media driver.
//!
//! The media driver is a separate process; clients talk to it through a
//! command-and-control file containing a command ring buffer (client to
//! driver) and an events broadcast buffer (driver to clients). The
//! [`client`] module holds the conductor that mediates between the public
//! messaging API and that file. The [`cluster`] module holds the sequencer
//! that orders client sessions into an append-only command log.
#![deny(missing_docs)]

#[cfg(target_endian = "big")]
compile_error!("mediabus is only supported on little-endian architectures");

pub mod client;
pub mod cluster;
pub mod cnc;
pub mod command;
pub mod concurrent;
pub mod control_protocol;
pub mod counters;
pub mod driver_events;
pub mod driver_proxy;
pub mod util;

const fn semantic_version_compose(major: u8, minor: u8, patch: u8) -> i32 {
    (major as i32) << 16 | (minor as i32) << 8 | (patch as i32)
}

#[cfg(test)]
mod tests {
    use crate::semantic_version_compose;

    #[test]
    fn version_compose_cnc() {
        assert_eq!(semantic_version_compose(0, 1, 0), 1 << 8);
    }
}
