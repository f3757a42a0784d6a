//! The cluster sequencer: a single-threaded agent that admits client
//! sessions from an ingress subscription and serializes their messages,
//! session lifecycle events, and timer expirations into an append-only
//! replicated log publication.

pub mod codecs;
pub mod sequencer;
pub mod session;
pub mod timer;
pub mod transport;
