//! Calibration store: per head/gain slopes in mV per W.

use crate::channel::{Head, NUM_HEADS};
use crate::connection::Connection;
use crate::gain::{GainIndex, NUM_GAINS};
use crate::protocol::{parse_calibration, Command};
use daq_core::error::{AppResult, DaqError};
use daq_core::serial::Transport;

/// Immutable 4×8 slope table, indexed `[head][gain]`.
///
/// Every slope is finite and strictly positive; [`CalibrationTable::from_slopes`]
/// and [`CalibrationTable::load`] refuse anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    slopes: [[f64; NUM_GAINS]; NUM_HEADS],
}

impl CalibrationTable {
    /// Build a table from known slopes.
    ///
    /// # Errors
    ///
    /// [`DaqError::CalibrationLoad`] if any slope is not finite and positive.
    pub fn from_slopes(slopes: [[f64; NUM_GAINS]; NUM_HEADS]) -> AppResult<Self> {
        for head in Head::ALL {
            for gain in GainIndex::all() {
                let slope = slopes[head.index()][gain.index()];
                if !slope.is_finite() || slope <= 0.0 {
                    return Err(DaqError::CalibrationLoad(format!(
                        "slope for {head} {gain} must be positive, got {slope}"
                    )));
                }
            }
        }
        Ok(Self { slopes })
    }

    /// Slope (mV/W) for a head at a gain stage.
    pub fn slope(&self, head: Head, gain: GainIndex) -> f64 {
        self.slopes[head.index()][gain.index()]
    }

    /// All slopes of one head, least to most sensitive.
    pub fn head_slopes(&self, head: Head) -> &[f64; NUM_GAINS] {
        &self.slopes[head.index()]
    }

    /// Read the full table from the device.
    ///
    /// Issues one `CAL` exchange per head/gain pair. Timeouts surface as
    /// communication errors; anything the device refuses or that does not
    /// decode to a usable slope fails the whole load.
    pub fn load<T: Transport>(conn: &mut Connection<T>) -> AppResult<Self> {
        let mut slopes = [[0.0f64; NUM_GAINS]; NUM_HEADS];

        for head in Head::ALL {
            for gain in GainIndex::all() {
                let command = Command::ReadCalibration { head, gain };
                let payload = conn.ask(&command).map_err(|e| match e {
                    DaqError::DeviceRejected { reason, .. } => DaqError::CalibrationLoad(
                        format!("device refused calibration for {head} {gain}: {reason}"),
                    ),
                    DaqError::MalformedResponse { detail, .. } => DaqError::CalibrationLoad(
                        format!("unreadable calibration for {head} {gain}: {detail}"),
                    ),
                    other => other,
                })?;

                let entry = parse_calibration(&command, &payload).map_err(|e| {
                    DaqError::CalibrationLoad(format!("{head} {gain}: {e}"))
                })?;
                let echoed_head = entry.head.map_or(true, |h| h == head.number());
                let echoed_gain = entry.gain.map_or(true, |g| g == gain.value());
                if !(echoed_head && echoed_gain) {
                    return Err(DaqError::CalibrationLoad(format!(
                        "asked for {head} {gain}, device answered '{payload}'"
                    )));
                }
                slopes[head.index()][gain.index()] = f64::from(entry.slope);
            }
        }

        let table = Self::from_slopes(slopes)?;
        tracing::debug!(entries = NUM_HEADS * NUM_GAINS, "calibration table loaded");
        Ok(table)
    }
}
