//! Byte transport abstraction for a cellular modem link.
//!
//! This is the lowest layer of cellmux. The multiplexer above only needs
//! a handful of primitives from the physical link:
//! - a bounded-wait read of whatever bytes have arrived
//! - an exclusive write so frames are never interleaved mid-write
//! - a line-speed change for baud detection
//!
//! [`SerialTransport`] drives a real UART through `serialport`;
//! [`FakeModem`] is an in-memory stand-in with a scripted responder.

pub mod error;
pub mod fake;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use fake::{FakeModem, WriteEvent};
pub use serial::SerialTransport;
pub use traits::Transport;
