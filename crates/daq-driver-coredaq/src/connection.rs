//! Command/response exchange over an open transport.

use crate::protocol::{Command, Reply};
use daq_core::error::{AppResult, DaqError};
use daq_core::serial::Transport;
use std::time::Duration;

/// An open link to one device.
///
/// Owns the transport exclusively; every exchange is bounded by `timeout`.
/// Nothing here retries: a failed exchange is reported to the caller as is.
pub struct Connection<T: Transport> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Connection<T> {
    /// Wrap an already-open transport.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Send one command and read exactly one reply line.
    ///
    /// Input left over from an earlier exchange (a reply that missed its
    /// deadline) is discarded first, so the line read belongs to `command`.
    pub fn exchange(&mut self, command: &Command) -> AppResult<Reply> {
        let wire = command.to_string();
        self.transport.drain();
        self.transport.send_line(&wire)?;
        let line = self
            .transport
            .read_line(self.timeout)?
            .ok_or_else(|| DaqError::Timeout {
                command: wire.clone(),
                timeout: self.timeout,
            })?;
        Reply::parse(&line)
            .ok_or_else(|| DaqError::malformed(&wire, format!("unrecognised reply '{line}'")))
    }

    /// Exchange a command that must be answered `OK`, returning the payload.
    pub fn ask(&mut self, command: &Command) -> AppResult<String> {
        match self.exchange(command)? {
            Reply::Ok(payload) => Ok(payload),
            Reply::Err(reason) => Err(DaqError::DeviceRejected {
                command: command.to_string(),
                reason,
            }),
            Reply::Busy => Err(DaqError::malformed(command.to_string(), "unexpected BUSY")),
        }
    }

    /// Like [`ask`](Self::ask) for commands whose payload is irrelevant.
    pub fn command(&mut self, command: &Command) -> AppResult<()> {
        self.ask(command).map(|_| ())
    }

    /// Read a binary payload that follows a reply line.
    pub fn read_payload(&mut self, command: &Command, buf: &mut [u8]) -> AppResult<()> {
        let filled = self.transport.read_exact_within(buf, self.timeout)?;
        if filled < buf.len() {
            return Err(DaqError::Timeout {
                command: format!("{command} (payload {filled}/{} bytes)", buf.len()),
                timeout: self.timeout,
            });
        }
        Ok(())
    }

    /// Discard stale input before a new conversation.
    pub fn drain(&mut self) -> usize {
        self.transport.drain()
    }

    /// Release the transport.
    pub fn close(&mut self) -> AppResult<()> {
        self.transport.close()
    }
}
