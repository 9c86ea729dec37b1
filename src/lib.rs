//! coredaq application layer
//!
//! Configuration, logging setup, CSV export and the application error type
//! around the coreDAQ driver. The driver itself lives in `daq-driver-coredaq`;
//! the shared error taxonomy and serial transport live in `daq-core`.
//!
//! The `coredaq` binary (`src/main.rs`) is a thin command line front end over
//! these pieces.

pub mod config;
pub mod error;
pub mod export;
pub mod tracing_config;

pub use config::CoredaqConfig;
pub use error::{AppError, AppResult};
