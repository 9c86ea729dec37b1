//! Gain mapping.
//!
//! Each head has a transimpedance amplifier with eight gain stages. A higher
//! index means more transimpedance: more sensitivity and a lower maximum
//! measurable optical power. The table below is fixed by the hardware.
//!
//! | Index | Max power |
//! |-------|-----------|
//! | 0     | 3.5 mW    |
//! | 1     | 1.5 mW    |
//! | 2     | 750 µW    |
//! | 3     | 350 µW    |
//! | 4     | 75 µW     |
//! | 5     | 35 µW     |
//! | 6     | 3.5 µW    |
//! | 7     | 350 nW    |

use crate::channel::{Head, NUM_HEADS};
use daq_core::error::{AppResult, DaqError};
use std::fmt;

/// Number of gain stages per head.
pub const NUM_GAINS: usize = 8;

/// One of the eight gain stages, 0..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GainIndex(u8);

impl GainIndex {
    /// Least sensitive stage.
    pub const MIN: GainIndex = GainIndex(0);
    /// Most sensitive stage.
    pub const MAX: GainIndex = GainIndex(NUM_GAINS as u8 - 1);

    /// Validate a gain index.
    pub fn new(value: u8) -> AppResult<Self> {
        if usize::from(value) < NUM_GAINS {
            Ok(GainIndex(value))
        } else {
            Err(DaqError::InvalidArgument(format!(
                "gain index must be 0..={}, got {value}",
                NUM_GAINS - 1
            )))
        }
    }

    /// Raw index as used on the wire.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Table position.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Next more sensitive stage, if any.
    pub fn more_sensitive(self) -> Option<GainIndex> {
        (self < Self::MAX).then(|| GainIndex(self.0 + 1))
    }

    /// Next less sensitive stage, if any.
    pub fn less_sensitive(self) -> Option<GainIndex> {
        (self > Self::MIN).then(|| GainIndex(self.0 - 1))
    }

    /// Iterate all stages from least to most sensitive.
    pub fn all() -> impl Iterator<Item = GainIndex> {
        (0..NUM_GAINS as u8).map(GainIndex)
    }
}

impl TryFrom<u8> for GainIndex {
    type Error = DaqError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        GainIndex::new(value)
    }
}

impl fmt::Display for GainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

// =============================================================================
// Gain table
// =============================================================================

/// A gain stage and the largest optical power it measures without saturating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainEntry {
    /// Stage index.
    pub index: GainIndex,
    /// Maximum power in Watts.
    pub max_power_w: f64,
    /// Human readable range.
    pub label: &'static str,
}

/// The fixed gain map, ordered by index with strictly decreasing max power.
pub const GAIN_TABLE: [GainEntry; NUM_GAINS] = [
    GainEntry { index: GainIndex(0), max_power_w: 3.5e-3, label: "3.5 mW" },
    GainEntry { index: GainIndex(1), max_power_w: 1.5e-3, label: "1.5 mW" },
    GainEntry { index: GainIndex(2), max_power_w: 750e-6, label: "750 µW" },
    GainEntry { index: GainIndex(3), max_power_w: 350e-6, label: "350 µW" },
    GainEntry { index: GainIndex(4), max_power_w: 75e-6, label: "75 µW" },
    GainEntry { index: GainIndex(5), max_power_w: 35e-6, label: "35 µW" },
    GainEntry { index: GainIndex(6), max_power_w: 3.5e-6, label: "3.5 µW" },
    GainEntry { index: GainIndex(7), max_power_w: 350e-9, label: "350 nW" },
];

/// Maximum power (W) of a gain stage.
pub fn power_for_index(gain: GainIndex) -> f64 {
    GAIN_TABLE[gain.index()].max_power_w
}

/// Label of a gain stage, e.g. `"750 µW"`.
pub fn gain_label(gain: GainIndex) -> &'static str {
    GAIN_TABLE[gain.index()].label
}

/// Pick the gain stage for an expected optical power.
///
/// Returns the most sensitive stage whose maximum power still covers
/// `power_w`, so an exact table value maps back to its own index.
///
/// # Errors
///
/// [`DaqError::InvalidArgument`] when `power_w` is not a positive number,
/// [`DaqError::InvalidRange`] when it exceeds the least sensitive stage.
pub fn index_for_power(power_w: f64) -> AppResult<GainIndex> {
    if !power_w.is_finite() || power_w <= 0.0 {
        return Err(DaqError::InvalidArgument(format!(
            "power must be a positive number of Watts, got {power_w}"
        )));
    }
    GAIN_TABLE
        .iter()
        .rev()
        .find(|entry| entry.max_power_w >= power_w)
        .map(|entry| entry.index)
        .ok_or_else(|| {
            DaqError::InvalidRange(format!(
                "{power_w} W exceeds the largest range ({})",
                GAIN_TABLE[0].label
            ))
        })
}

// =============================================================================
// Gain requests
// =============================================================================

/// How a caller asks for a gain: by index or by the power range to cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainSetting {
    /// Explicit stage.
    Index(GainIndex),
    /// Expected maximum optical power in Watts.
    PowerRange(f64),
}

impl GainSetting {
    /// Build a setting from the two optional arguments, exactly one of which
    /// must be present.
    pub fn from_options(value: Option<u8>, power_range_w: Option<f64>) -> AppResult<Self> {
        match (value, power_range_w) {
            (Some(v), None) => Ok(GainSetting::Index(GainIndex::new(v)?)),
            (None, Some(p)) => Ok(GainSetting::PowerRange(p)),
            (Some(_), Some(_)) => Err(DaqError::InvalidArgument(
                "supply either a gain value or a power range, not both".into(),
            )),
            (None, None) => Err(DaqError::InvalidArgument(
                "supply a gain value or a power range".into(),
            )),
        }
    }

    /// Resolve to a concrete stage.
    pub fn resolve(self) -> AppResult<GainIndex> {
        match self {
            GainSetting::Index(gain) => Ok(gain),
            GainSetting::PowerRange(power_w) => index_for_power(power_w),
        }
    }
}

impl From<GainIndex> for GainSetting {
    fn from(gain: GainIndex) -> Self {
        GainSetting::Index(gain)
    }
}

/// Host-side copy of the gain latched on each head.
///
/// A gain written without a refresh is held as staged and only becomes the
/// latched gain once a refresh is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GainState {
    latched: [GainIndex; NUM_HEADS],
    staged: [Option<GainIndex>; NUM_HEADS],
}

impl GainState {
    /// State from gains reported by the device, in head order.
    pub fn from_gains(latched: [GainIndex; NUM_HEADS]) -> Self {
        Self {
            latched,
            staged: [None; NUM_HEADS],
        }
    }

    /// Gain latched on `head`.
    pub fn get(&self, head: Head) -> GainIndex {
        self.latched[head.index()]
    }

    /// Gain written to `head` but not yet refreshed.
    pub fn staged(&self, head: Head) -> Option<GainIndex> {
        self.staged[head.index()]
    }

    /// Record a gain written to `head` without a refresh.
    pub fn stage(&mut self, head: Head, gain: GainIndex) {
        self.staged[head.index()] = Some(gain);
    }

    /// A refresh latches every staged gain.
    pub fn refresh(&mut self) {
        for (latched, staged) in self.latched.iter_mut().zip(self.staged.iter_mut()) {
            if let Some(gain) = staged.take() {
                *latched = gain;
            }
        }
    }

    /// All latched gains in head order.
    pub fn all(&self) -> [GainIndex; NUM_HEADS] {
        self.latched
    }
}
