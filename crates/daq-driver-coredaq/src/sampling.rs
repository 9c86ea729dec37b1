//! Sample rate and oversampling limits.
//!
//! Oversampling index `os` averages `2^os` conversions per frame, which caps
//! the frame rate: 100 kHz up to `os = 1`, halving with every further step.

/// Highest frame rate the ADC supports.
pub const MAX_FREQUENCY_HZ: u32 = 100_000;

/// Highest oversampling index.
pub const MAX_OVERSAMPLING: u8 = 7;

/// Highest frame rate allowed at oversampling index `os` (clamped to 0..=7).
pub fn max_frequency_for(os: u8) -> u32 {
    let os = os.min(MAX_OVERSAMPLING);
    if os <= 1 {
        MAX_FREQUENCY_HZ
    } else {
        MAX_FREQUENCY_HZ >> (os - 1)
    }
}

/// Largest oversampling index that still allows `hz`.
pub fn best_oversampling_for(hz: u32) -> u8 {
    (0..=MAX_OVERSAMPLING)
        .take_while(|&os| hz <= max_frequency_for(os))
        .last()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_halve_per_step() {
        assert_eq!(max_frequency_for(0), 100_000);
        assert_eq!(max_frequency_for(1), 100_000);
        assert_eq!(max_frequency_for(2), 50_000);
        assert_eq!(max_frequency_for(7), 1_562);
    }

    #[test]
    fn best_index_for_rate() {
        assert_eq!(best_oversampling_for(100_000), 1);
        assert_eq!(best_oversampling_for(50_000), 2);
        assert_eq!(best_oversampling_for(30_000), 2);
        assert_eq!(best_oversampling_for(1_000), 7);
    }
}
