//! Error types shared by the coredaq crates.
//!
//! This module defines the primary error type, `DaqError`, for the driver stack.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different failures that can occur while talking to a coreDAQ, from serial
//! timeouts to caller misuse of the acquisition state machine.
//!
//! ## Error Taxonomy
//!
//! Every variant maps onto one [`ErrorKind`] through [`DaqError::kind`]. Callers
//! branch on the kind rather than on individual variants:
//!
//! - **`Communication`**: timeouts, malformed replies, I/O failures and closed ports.
//!   Always surfaced to the caller, never retried internally.
//! - **`DeviceRejected`**: the firmware answered `ERR ...` to a well-formed command.
//! - **`CalibrationLoad`**: the calibration table could not be read at connect time.
//!   Fatal to the connection.
//! - **`InvalidArgument`**: caller misuse (bad head/gain index, conflicting options).
//! - **`InvalidRange`**: a requested optical power no gain stage can serve.
//! - **`InvalidState`**: an acquisition operation attempted outside its valid state.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Coarse classification of a [`DaqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout or malformed exchange at the transport/codec boundary.
    Communication,
    /// The device refused a well-formed command.
    DeviceRejected,
    /// Calibration table missing or malformed.
    CalibrationLoad,
    /// Caller supplied invalid arguments.
    InvalidArgument,
    /// Requested power outside every gain stage.
    InvalidRange,
    /// Operation attempted outside its valid acquisition state.
    InvalidState,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Communication => "communication",
            ErrorKind::DeviceRejected => "device_rejected",
            ErrorKind::CalibrationLoad => "calibration_load",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidRange => "invalid_range",
            ErrorKind::InvalidState => "invalid_state",
        };
        write!(f, "{}", label)
    }
}

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

// =============================================================================
// DaqError
// =============================================================================

/// Primary error type for the coredaq driver stack.
///
/// # Example
///
/// ```rust
/// use daq_core::error::{DaqError, ErrorKind};
///
/// fn check_head(head: u8) -> Result<(), DaqError> {
///     if !(1..=4).contains(&head) {
///         return Err(DaqError::InvalidArgument(format!("head {head} must be 1..=4")));
///     }
///     Ok(())
/// }
///
/// let err = check_head(7).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// No complete reply arrived before the exchange deadline.
    ///
    /// **Error Type**: Usually permanent for the session - the device is unplugged,
    /// busy streaming, or the baud rate is wrong.
    ///
    /// **Recovery Strategy**: Retrying is a caller policy. The driver never retries.
    #[error("Timed out after {timeout:?} waiting for reply to '{command}'")]
    Timeout {
        /// Command that was in flight.
        command: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The reply bytes do not parse as a well-formed reply for the issued command.
    #[error("Malformed reply to '{command}': {detail}")]
    MalformedResponse {
        /// Command that was in flight.
        command: String,
        /// What was wrong with the reply.
        detail: String,
    },

    /// Generic communication failure that is neither a timeout nor a parse error.
    #[error("Communication error: {0}")]
    Communication(String),

    /// The transport has been closed or was never opened.
    ///
    /// **Recovery Strategy**: Open a new connection. A closed connection is not reusable.
    #[error("Serial port not connected")]
    NotConnected,

    /// Underlying I/O failure while reading or writing the stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or configuring the serial port failed.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The firmware answered `ERR <reason>`.
    #[error("Device rejected '{command}': {reason}")]
    DeviceRejected {
        /// Command that was refused.
        command: String,
        /// Reason text returned by the firmware.
        reason: String,
    },

    /// The calibration table could not be loaded or failed validation.
    ///
    /// **Error Type**: Permanent - fatal to the connection, power conversions
    /// cannot proceed without calibration.
    #[error("Calibration load error: {0}")]
    CalibrationLoad(String),

    /// Caller misuse: out-of-range index, conflicting options, bad frame count.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_frames(frames: u32) -> Result<(), DaqError> {
    ///     if frames == 0 {
    ///         return Err(DaqError::InvalidArgument("frames must be > 0".into()));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested optical power exceeds every gain stage or is not positive.
    #[error("Invalid power range: {0}")]
    InvalidRange(String),

    /// Operation attempted in a state that does not allow it.
    ///
    /// **Recovery Strategy**: Drive the state machine to a valid state first
    /// (e.g. `arm` before `start`), or `stop` to return to idle.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: String,
        /// State the machine was in.
        state: String,
    },
}

impl DaqError {
    /// Classify this error into the driver taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaqError::Timeout { .. }
            | DaqError::MalformedResponse { .. }
            | DaqError::Communication(_)
            | DaqError::NotConnected
            | DaqError::Io(_) => ErrorKind::Communication,
            #[cfg(feature = "serial")]
            DaqError::Serial(_) => ErrorKind::Communication,
            DaqError::DeviceRejected { .. } => ErrorKind::DeviceRejected,
            DaqError::CalibrationLoad(_) => ErrorKind::CalibrationLoad,
            DaqError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DaqError::InvalidRange(_) => ErrorKind::InvalidRange,
            DaqError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// True for faults at the transport/codec boundary.
    ///
    /// The acquisition state machine enters its error state on these.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Communication | ErrorKind::DeviceRejected
        )
    }

    /// Build a [`DaqError::MalformedResponse`].
    pub fn malformed(command: impl Into<String>, detail: impl Into<String>) -> Self {
        DaqError::MalformedResponse {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Build a [`DaqError::InvalidState`].
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        DaqError::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }
}
