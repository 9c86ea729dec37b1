//! Configuration loading using Figment
//!
//! Configuration is merged from, in increasing priority:
//! 1. built-in defaults
//! 2. `config/coredaq.toml` (or an explicit path)
//! 3. environment variables prefixed with `COREDAQ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use coredaq::config::CoredaqConfig;
//!
//! // COREDAQ_DEVICE__PORT=/dev/ttyACM1 overrides [device] port
//! let config = CoredaqConfig::load()?;
//! config.validate()?;
//! println!("port: {:?}", config.device.port);
//! # Ok::<(), coredaq::error::AppError>(())
//! ```

use crate::error::{AppError, AppResult};
use daq_driver_coredaq::{AcquisitionOptions, DriverOptions};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/coredaq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "COREDAQ_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CoredaqConfig {
    /// Logging settings
    pub application: ApplicationConfig,
    /// Serial link settings
    pub device: DeviceConfig,
    /// Acquisition timing
    pub acquisition: AcquisitionOptions,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path (e.g., "/dev/ttyACM0"); required unless running the simulator
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-exchange reply timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            timeout: Duration::from_millis(500),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl CoredaqConfig {
    /// Load from the default path and environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(CoredaqConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(AppError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            )));
        }

        if self.device.baud_rate == 0 {
            return Err(AppError::Configuration("baud_rate must be > 0".into()));
        }

        self.driver_options()
            .validate()
            .map_err(|e| AppError::Configuration(e.to_string()))
    }

    /// Options handed to the driver.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            timeout: self.device.timeout,
            acquisition: self.acquisition.clone(),
        }
    }
}
