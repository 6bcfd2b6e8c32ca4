//! Lock-free queues: the bounded ring buffer and the unbounded segmented
//! FIFO built on top of it.

pub mod ring;
pub mod unbounded;

pub use ring::{PushError, RingBuffer};
pub use unbounded::UnboundedQueue;
