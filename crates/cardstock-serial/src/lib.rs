//! Non-blocking serial transport abstraction.
//!
//! The debug protocol core never owns a real UART. It talks to a byte source
//! through the [`SerialPort`] trait, which mirrors what a microcontroller
//! serial peripheral offers:
//! - a non-blocking "bytes available" count
//! - single-byte and bulk reads that are only issued once the data is there
//! - a fire-and-forget write
//!
//! Implementations provided here:
//! - [`LoopbackPort`]: in-memory port for tests and capture replay
//! - [`StreamPort`]: adapter over any non-blocking `Read + Write` stream
//! - [`SerialSocket`]: Unix domain socket link used as a host-side serial line

pub mod error;
pub mod loopback;
pub mod stream;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use loopback::LoopbackPort;
pub use stream::StreamPort;
pub use traits::SerialPort;

#[cfg(unix)]
pub use uds::SerialSocket;
