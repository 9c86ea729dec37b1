//! Head (measurement channel) addressing.

use daq_core::error::{AppResult, DaqError};
use std::fmt;

/// Number of measurement heads, one per ADC channel.
pub const NUM_HEADS: usize = 4;

/// One of the four measurement heads, numbered 1..=4 as on the front panel.
///
/// Construction validates the range, so every `Head` in circulation is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Head(u8);

impl Head {
    /// All heads in channel order.
    pub const ALL: [Head; NUM_HEADS] = [Head(1), Head(2), Head(3), Head(4)];

    /// Validate a 1-based head number.
    pub fn new(number: u8) -> AppResult<Self> {
        if (1..=NUM_HEADS as u8).contains(&number) {
            Ok(Head(number))
        } else {
            Err(DaqError::InvalidArgument(format!(
                "head must be 1..={NUM_HEADS}, got {number}"
            )))
        }
    }

    /// 1-based head number as used on the wire.
    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based channel index.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for Head {
    type Error = DaqError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Head::new(number)
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}
