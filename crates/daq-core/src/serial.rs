//! Blocking Serial Transport for Driver Crates
//!
//! This module provides the byte-stream transport the coreDAQ driver talks
//! through. Every exchange blocks the calling thread until a reply arrives or
//! the caller-supplied timeout elapses. There is no retry logic here.
//!
//! # Feature Flag
//!
//! Opening real hardware requires the `serial` feature (enabled by default):
//!
//! ```toml
//! [dependencies]
//! daq-core = { path = "../daq-core", features = ["serial"] }
//! ```
//!
//! # Types
//!
//! - [`SerialIo`]: Trait alias combining `Read + Write + Send`
//! - [`DynSerial`]: Type-erased boxed stream
//! - [`Transport`]: Line/byte oriented transport used by protocol engines
//! - [`StreamTransport`]: [`Transport`] over any [`SerialIo`] stream
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::serial::{open_serial, Transport};
//! use std::time::Duration;
//!
//! let mut transport = open_serial("/dev/ttyACM0", 115_200, "coreDAQ")?;
//! transport.send_line("IDN?")?;
//! let reply = transport.read_line(Duration::from_millis(500))?;
//! ```

use crate::error::{AppResult, DaqError};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// How long a single blocking read on real hardware may wait before the
/// transport re-checks its deadline.
pub const READ_SLICE: Duration = Duration::from_millis(10);

/// Upper bound on how long [`Transport::drain`] keeps discarding input.
pub const DRAIN_BUDGET: Duration = Duration::from_millis(50);

// =============================================================================
// Serial Stream Trait
// =============================================================================

/// Trait alias for blocking serial stream I/O.
///
/// Any type implementing `Read + Write + Send` can be used as a serial port.
/// This includes:
/// - `Box<dyn serialport::SerialPort>` (real hardware)
/// - `MockCoreDaq` (firmware simulator)
/// - Any test double implementing the std I/O traits
///
/// Reads are expected to return `ErrorKind::TimedOut` (or `WouldBlock`, or
/// `Ok(0)`) when no data is available yet, the way `serialport` does.
pub trait SerialIo: Read + Write + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: Read + Write + Send> SerialIo for T {}

/// Type-erased boxed serial stream.
pub type DynSerial = Box<dyn SerialIo>;

// =============================================================================
// Transport Trait
// =============================================================================

/// Line and byte oriented transport.
///
/// Reads report a timeout as `Ok(None)` / a short count rather than an error so
/// the protocol layer can attach the command that was in flight.
pub trait Transport: Send {
    /// Write one command line, appending the `\n` terminator.
    ///
    /// The full frame is assembled before the write so a command is never
    /// split across writes.
    fn send_line(&mut self, line: &str) -> AppResult<()>;

    /// Read one `\n`-terminated line, returned without the terminator and
    /// trimmed. `Ok(None)` when `timeout` elapses first.
    fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>>;

    /// Fill `buf` completely. Returns the number of bytes filled, which is
    /// less than `buf.len()` only when `timeout` elapsed.
    fn read_exact_within(&mut self, buf: &mut [u8], timeout: Duration) -> AppResult<usize>;

    /// Discard stale input. Returns the number of bytes discarded.
    fn drain(&mut self) -> usize;

    /// Release the underlying stream. Idempotent.
    fn close(&mut self) -> AppResult<()>;

    /// Whether the underlying stream is still held.
    fn is_open(&self) -> bool;
}

// =============================================================================
// StreamTransport
// =============================================================================

/// [`Transport`] over any blocking [`SerialIo`] stream.
///
/// Bytes that arrive after a line terminator are kept and served to the next
/// read, so binary payloads that directly follow a text header are not lost.
pub struct StreamTransport<S: SerialIo> {
    stream: Option<S>,
    pending: Vec<u8>,
    device_name: String,
}

impl<S: SerialIo> StreamTransport<S> {
    /// Wrap an already-open stream.
    pub fn new(stream: S, device_name: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            pending: Vec::with_capacity(256),
            device_name: device_name.into(),
        }
    }

    /// Human-readable device name used in log output.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Borrow the underlying stream, e.g. to inspect a simulator in tests.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Read whatever is available into `pending`. Returns bytes read; 0 means
    /// nothing arrived during this read slice.
    fn fill_pending(&mut self) -> AppResult<usize> {
        let stream = self.stream.as_mut().ok_or(DaqError::NotConnected)?;
        let mut chunk = [0u8; 512];
        match stream.read(&mut chunk) {
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(DaqError::Io(e)),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

impl<S: SerialIo> Transport for StreamTransport<S> {
    fn send_line(&mut self, line: &str) -> AppResult<()> {
        let stream = self.stream.as_mut().ok_or(DaqError::NotConnected)?;
        let frame = format!("{}\n", line.trim_end_matches('\n'));
        tracing::trace!(device = %self.device_name, cmd = %frame.escape_default(), "send");
        stream.write_all(frame.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>> {
        let start = Instant::now();
        loop {
            if let Some(line) = self.take_line() {
                tracing::trace!(device = %self.device_name, reply = %line.escape_default(), "recv");
                return Ok(Some(line));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            if self.fill_pending()? == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn read_exact_within(&mut self, buf: &mut [u8], timeout: Duration) -> AppResult<usize> {
        let start = Instant::now();
        let mut filled = 0usize;
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                filled += n;
            }
            if filled == buf.len() || start.elapsed() >= timeout {
                return Ok(filled);
            }
            if self.fill_pending()? == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn drain(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();

        let deadline = Instant::now() + DRAIN_BUDGET;
        while Instant::now() < deadline {
            match self.fill_pending() {
                Ok(0) => break,
                Ok(n) => {
                    discarded += n;
                    self.pending.clear();
                }
                Err(e) => {
                    tracing::warn!(device = %self.device_name, error = %e, "I/O error during drain");
                    break;
                }
            }
        }

        if discarded > 0 {
            tracing::debug!(device = %self.device_name, discarded, "discarded stale bytes");
        }
        discarded
    }

    fn close(&mut self) -> AppResult<()> {
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
            tracing::debug!(device = %self.device_name, "transport closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl<S: SerialIo> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(device = %self.device_name, error = %e, "error while closing transport");
        }
    }
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port with the standard 8N1, no flow control settings.
///
/// The port's own read timeout is set to [`READ_SLICE`]; exchange deadlines
/// are enforced by [`StreamTransport`].
///
/// # Errors
///
/// Returns [`DaqError::Serial`] if the port cannot be opened.
#[cfg(feature = "serial")]
pub fn open_serial(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> AppResult<StreamTransport<Box<dyn serialport::SerialPort>>> {
    let port = serialport::new(port_path, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_SLICE)
        .open()?;

    tracing::info!(port = %port_path, baud_rate, "opened {} serial port", device_name);
    Ok(StreamTransport::new(port, device_name))
}
