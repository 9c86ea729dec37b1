//! Conversion pipeline: raw ADC code → mV → W.
//!
//! The ADC spans ±5 V over signed 16-bit codes, so a code maps linearly to
//! `code / 32768 × 5000` mV. Power follows from the per head/gain calibration
//! slope as `W = mV / slope`, optionally rounded to significant digits.

use crate::calibration::CalibrationTable;
use crate::channel::{Head, NUM_HEADS};
use crate::gain::GainIndex;

/// Signed codes spanning half the ADC range.
pub const FULL_SCALE_CODES: f64 = 32768.0;

/// Millivolts at positive full scale.
pub const FULL_SCALE_MV: f64 = 5000.0;

/// Default significant digits for power values.
pub const DEFAULT_SIG_DIGITS: u32 = 4;

/// Convert a (zero-corrected) ADC code to millivolts.
pub fn code_to_mv(code: f64) -> f64 {
    code / FULL_SCALE_CODES * FULL_SCALE_MV
}

/// Convert millivolts to Watts with a slope in mV/W.
pub fn mv_to_watts(mv: f64, slope_mv_per_w: f64) -> f64 {
    mv / slope_mv_per_w
}

/// Round to `digits` significant digits (not decimal places).
///
/// `round_sig(0.123456, 4) == 0.1235`, `round_sig(123456.0, 2) == 120000.0`.
/// Zero and non-finite values pass through; `digits == 0` is treated as 1.
pub fn round_sig(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let digits = i32::try_from(digits.max(1)).unwrap_or(i32::MAX);
    let magnitude = value.abs().log10().floor() as i32;
    let exponent = digits.saturating_sub(1).saturating_sub(magnitude);
    // scale by an exact power of ten in whichever direction keeps it exact
    let factor = 10f64.powi(exponent.saturating_abs());
    if !factor.is_finite() {
        return value;
    }
    if exponent >= 0 {
        (value * factor).round() / factor
    } else {
        (value / factor).round() * factor
    }
}

// =============================================================================
// Zero offsets
// =============================================================================

/// Per-channel ADC zero offsets, subtracted in the code domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZeroOffsets([i32; NUM_HEADS]);

impl ZeroOffsets {
    /// Offsets in head order.
    pub fn new(codes: [i32; NUM_HEADS]) -> Self {
        Self(codes)
    }

    /// Offset of one head.
    pub fn get(&self, head: Head) -> i32 {
        self.0[head.index()]
    }

    /// All offsets in head order.
    pub fn codes(&self) -> [i32; NUM_HEADS] {
        self.0
    }

    /// Zero-corrected code for a head.
    pub fn correct(&self, head: Head, code: f64) -> f64 {
        code - f64::from(self.get(head))
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Device-averaged ADC codes and the gains latched while averaging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeSnapshot {
    /// Averaged code per head, as reported (no zero correction).
    pub codes: [i32; NUM_HEADS],
    /// Latched gain per head.
    pub gains: [GainIndex; NUM_HEADS],
}

/// Averaged millivolts per head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MvSnapshot {
    /// Zero-corrected mV per head.
    pub mv: [f64; NUM_HEADS],
    /// Latched gain per head.
    pub gains: [GainIndex; NUM_HEADS],
}

/// Averaged optical power per head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSnapshot {
    /// Power in Watts per head.
    pub power_w: [f64; NUM_HEADS],
    /// The mV values the power was derived from.
    pub mv: [f64; NUM_HEADS],
    /// Latched gain per head.
    pub gains: [GainIndex; NUM_HEADS],
}

impl CodeSnapshot {
    /// Apply zero offsets and convert to mV.
    pub fn to_mv(&self, zeros: &ZeroOffsets) -> MvSnapshot {
        let mut mv = [0.0; NUM_HEADS];
        for head in Head::ALL {
            let code = f64::from(self.codes[head.index()]);
            mv[head.index()] = code_to_mv(zeros.correct(head, code));
        }
        MvSnapshot {
            mv,
            gains: self.gains,
        }
    }
}

impl MvSnapshot {
    /// Convert to power with the slopes for the latched gains.
    pub fn to_power(&self, calibration: &CalibrationTable) -> PowerSnapshot {
        let mut power_w = [0.0; NUM_HEADS];
        for head in Head::ALL {
            let slope = calibration.slope(head, self.gains[head.index()]);
            power_w[head.index()] = mv_to_watts(self.mv[head.index()], slope);
        }
        PowerSnapshot {
            power_w,
            mv: self.mv,
            gains: self.gains,
        }
    }
}

// =============================================================================
// Bulk conversion
// =============================================================================

/// Per-channel sample sequences, all the same length.
pub type Channels<T> = [Vec<T>; NUM_HEADS];

/// Convert raw per-channel codes to mV, applying zero offsets.
pub fn channels_to_mv(codes: &Channels<i16>, zeros: &ZeroOffsets) -> Channels<f64> {
    let mut out: Channels<f64> = Default::default();
    for head in Head::ALL {
        out[head.index()] = codes[head.index()]
            .iter()
            .map(|&code| code_to_mv(zeros.correct(head, f64::from(code))))
            .collect();
    }
    out
}

/// Convert per-channel mV to Watts at fixed gains, rounding each value.
pub fn channels_to_watts(
    mv: Channels<f64>,
    calibration: &CalibrationTable,
    gains: [GainIndex; NUM_HEADS],
    sig_digits: u32,
) -> Channels<f64> {
    let mut out = mv;
    for head in Head::ALL {
        let slope = calibration.slope(head, gains[head.index()]);
        for value in &mut out[head.index()] {
            *value = round_sig(mv_to_watts(*value, slope), sig_digits);
        }
    }
    out
}
