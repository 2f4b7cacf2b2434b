//! Sample-indexed timebase shared by the analysis and render loops.

/// A point in time measured in samples of the capture stream.
///
/// Both loops timestamp their work with the capture clock rather than wall
/// time, so phase corrections computed on one core line up with ticks on the
/// other. Differences are always computed from sample indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioTime {
    /// Index of the first sample this timestamp refers to
    pub sample_index: u64,
    /// Sample rate of the stream in Hz
    pub sample_rate: u32,
}

impl AudioTime {
    pub fn new(sample_index: u64, sample_rate: u32) -> Self {
        Self { sample_index, sample_rate }
    }

    /// The same timebase moved forward by `samples`.
    #[inline]
    pub fn advanced(self, samples: u64) -> Self {
        Self {
            sample_index: self.sample_index.wrapping_add(samples),
            sample_rate: self.sample_rate,
        }
    }

    /// The same timebase moved backward by `samples`, saturating at zero.
    #[inline]
    pub fn rewound(self, samples: u64) -> Self {
        Self {
            sample_index: self.sample_index.saturating_sub(samples),
            sample_rate: self.sample_rate,
        }
    }

    /// Signed sample distance from `earlier` to `self`.
    #[inline]
    pub fn samples_since(&self, earlier: &AudioTime) -> i64 {
        self.sample_index.wrapping_sub(earlier.sample_index) as i64
    }

    /// Signed distance from `earlier` to `self` in seconds.
    ///
    /// Returns `0.0` when the sample rate is unknown.
    #[inline]
    pub fn seconds_since(&self, earlier: &AudioTime) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_since(earlier) as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_signed() {
        let a = AudioTime::new(16_000, 16_000);
        let b = a.advanced(8_000);
        assert_eq!(b.samples_since(&a), 8_000);
        assert!((b.seconds_since(&a) - 0.5).abs() < 1e-9);
        assert!((a.seconds_since(&b) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_rate_yields_zero() {
        let a = AudioTime::new(0, 0);
        let b = AudioTime::new(100, 0);
        assert_eq!(b.seconds_since(&a), 0.0);
    }

    #[test]
    fn rewind_saturates() {
        let a = AudioTime::new(10, 16_000);
        assert_eq!(a.rewound(256).sample_index, 0);
    }
}
