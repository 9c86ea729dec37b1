//! `daq-core`
//!
//! Shared building blocks for the coredaq driver stack.
//!
//! - [`error`]: the [`DaqError`](error::DaqError) taxonomy every driver
//!   operation reports through, classified by [`ErrorKind`](error::ErrorKind).
//! - [`serial`]: the blocking [`Transport`](serial::Transport) abstraction and
//!   its [`StreamTransport`](serial::StreamTransport) implementation over
//!   serial ports or any `Read + Write` stream.
//!
//! Everything here is synchronous: an exchange blocks the calling thread until
//! a reply or a timeout.

pub mod error;
pub mod serial;

pub use error::{AppResult, DaqError, ErrorKind};
pub use serial::{DynSerial, SerialIo, StreamTransport, Transport};

#[cfg(feature = "serial")]
pub use serial::open_serial;
