//! Concurrent primitives shared by the conductor and the sequencer: atomic
//! views over byte buffers, the ring-buffer and broadcast transports, clock
//! sources, idle strategies, and the cooperative agent framework.

pub mod agent;
pub mod broadcast;
pub mod buffer;
pub mod clock;
pub mod ringbuffer;
pub mod strategies;

pub use buffer::AtomicBuffer;
