//! Application-level error type.
//!
//! Driver failures stay [`DaqError`](daq_core::DaqError)s with their own
//! classification; this type covers the process around the driver:
//! configuration, logging setup and output files.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Errors raised by the `coredaq` application layer.
#[derive(Error, Debug)]
pub enum AppError {
    /// The configuration could not be read or deserialised.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// The configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The tracing subscriber could not be installed.
    #[error("Tracing initialisation error: {0}")]
    Tracing(String),

    /// Writing acquisition output failed.
    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
