//! Configuration for the analysis pipeline and the musical clock.
//!
//! Every component has its own config struct with reference defaults and
//! builder-style setters. [`PipelineConfig`] bundles them together with the
//! hop geometry and is validated once, when the pipeline is built.

use crate::error::ConfigError;

/// Number of spectral bands delivered per hop by the band energy provider
pub const NUM_BANDS: usize = 8;

/// Upper bound on the number of tempo candidates extracted per cycle
pub const MAX_CANDIDATES: usize = 12;

/// Minimum separation between the on and off threshold of a state transition
pub const MIN_HYSTERESIS_GAP: f32 = 0.10;

// f32 subtraction of the reference thresholds lands a hair under 0.10
const GAP_EPSILON: f32 = 1e-4;

/// Spectral-flux novelty and onset picking parameters
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoveltyConfig {
    /// Gain applied to the summed positive band differences
    pub flux_gain: f32,
    /// Rolling window used for the adaptive threshold, in hops
    pub window_len: usize,
    /// Standard deviations above the mean an onset peak must reach
    pub threshold_k: f32,
    /// Absolute threshold floor that suppresses triggering in near-silence
    pub threshold_floor: f32,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            flux_gain: 1.0,
            window_len: 16,
            threshold_k: 2.0,
            threshold_floor: 0.05,
        }
    }
}

impl NoveltyConfig {
    pub fn with_flux_gain(mut self, gain: f32) -> Self {
        self.flux_gain = gain;
        self
    }

    pub fn with_window_len(mut self, hops: usize) -> Self {
        self.window_len = hops;
        self
    }

    pub fn with_threshold(mut self, k: f32, floor: f32) -> Self {
        self.threshold_k = k;
        self.threshold_floor = floor;
        self
    }
}

/// Resonator bank geometry
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResonatorConfig {
    /// Slowest tempo with a resonator
    pub min_bpm: f32,
    /// Fastest tempo with a resonator
    pub max_bpm: f32,
    /// Spacing between neighbouring resonators
    pub bpm_step: f32,
    /// Time constant of the exponential integration window, in seconds
    pub window_secs: f32,
    /// Time constant of the DC tracker removed from the novelty stream
    pub dc_secs: f32,
    /// Number of candidates kept per cycle (at most [`MAX_CANDIDATES`])
    pub top_k: usize,
    /// Peaks below this magnitude are not reported as candidates
    pub min_magnitude: f32,
}

impl Default for ResonatorConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 180.0,
            bpm_step: 1.0,
            window_secs: 8.0,
            dc_secs: 2.0,
            top_k: MAX_CANDIDATES,
            min_magnitude: 1e-5,
        }
    }
}

impl ResonatorConfig {
    pub fn with_bpm_range(mut self, min_bpm: f32, max_bpm: f32) -> Self {
        self.min_bpm = min_bpm;
        self.max_bpm = max_bpm;
        self
    }

    pub fn with_window_secs(mut self, secs: f32) -> Self {
        self.window_secs = secs;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    /// Number of resonators covering the configured range
    pub fn num_resonators(&self) -> usize {
        ((self.max_bpm - self.min_bpm) / self.bpm_step).round() as usize + 1
    }
}

/// Confidence thresholds of the `Lost`/`Coast`/`Locked` state machine
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateThresholds {
    pub lost_to_coast: f32,
    pub coast_to_lost: f32,
    pub coast_to_locked: f32,
    pub locked_to_coast: f32,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self {
            lost_to_coast: 0.35,
            coast_to_lost: 0.25,
            coast_to_locked: 0.44,
            locked_to_coast: 0.34,
        }
    }
}

impl StateThresholds {
    /// Check that every on/off pair keeps at least [`MIN_HYSTERESIS_GAP`] apart
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            (self.lost_to_coast, self.coast_to_lost),
            (self.coast_to_locked, self.locked_to_coast),
        ];
        for (on, off) in pairs {
            if on - off + GAP_EPSILON < MIN_HYSTERESIS_GAP {
                return Err(ConfigError::InvalidHysteresis { on, off });
            }
        }
        if self.coast_to_locked <= self.lost_to_coast {
            return Err(ConfigError::InvalidParameter(format!(
                "coast_to_locked ({:.3}) must exceed lost_to_coast ({:.3})",
                self.coast_to_locked, self.lost_to_coast
            )));
        }
        Ok(())
    }
}

/// Tactus selection, switching hysteresis and BPM smoothing
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TactusConfig {
    /// Weight of the half- and double-tempo relatives in the family score
    pub family_weight: f32,
    /// How far a candidate may sit from b/2, b or 2b and still count
    pub family_tolerance_bpm: f32,
    /// Centre of the perceptual tempo prior
    pub prior_center_bpm: f32,
    /// Width of the perceptual tempo prior
    pub prior_sigma_bpm: f32,
    /// Score ratio a challenger must exceed to start a switch streak
    pub switch_ratio: f32,
    /// Consecutive cycles the challenger must hold its advantage
    pub switch_cycles: u32,
    /// How far the challenger may wander and still extend its streak
    pub challenger_tolerance_bpm: f32,
    /// Magnitude a sub-harmonic (b/2 or b/3) must reach, relative to `b`,
    /// for `b` to count as an overtone of it
    pub harmonic_ratio: f32,
    /// Smoothed-BPM blend factor while `Locked`
    pub locked_blend: f32,
    /// Distance from the incumbent beyond which a `Locked` tracker still
    /// blends with `unlocked_blend`
    pub catch_up_bpm: f32,
    /// Smoothed-BPM blend factor while `Lost` or `Coast`
    pub unlocked_blend: f32,
    pub thresholds: StateThresholds,
}

impl Default for TactusConfig {
    fn default() -> Self {
        Self {
            family_weight: 0.4,
            family_tolerance_bpm: 4.0,
            prior_center_bpm: 120.0,
            prior_sigma_bpm: 30.0,
            switch_ratio: 1.15,
            switch_cycles: 8,
            challenger_tolerance_bpm: 2.0,
            harmonic_ratio: 0.7,
            locked_blend: 0.01,
            catch_up_bpm: 0.5,
            unlocked_blend: 0.3,
            thresholds: StateThresholds::default(),
        }
    }
}

impl TactusConfig {
    pub fn with_thresholds(mut self, thresholds: StateThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_switching(mut self, ratio: f32, cycles: u32) -> Self {
        self.switch_ratio = ratio;
        self.switch_cycles = cycles;
        self
    }

    pub fn with_prior(mut self, center_bpm: f32, sigma_bpm: f32) -> Self {
        self.prior_center_bpm = center_bpm;
        self.prior_sigma_bpm = sigma_bpm;
        self
    }

    pub fn with_harmonic_ratio(mut self, ratio: f32) -> Self {
        self.harmonic_ratio = ratio;
        self
    }

    pub fn with_blends(mut self, locked: f32, unlocked: f32, catch_up_bpm: f32) -> Self {
        self.locked_blend = locked;
        self.unlocked_blend = unlocked;
        self.catch_up_bpm = catch_up_bpm;
        self
    }
}

/// Weights of the confidence components
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfidenceWeights {
    pub baseline: f32,
    pub tempo_dominance: f32,
    pub phase_lock: f32,
    pub onset_agreement: f32,
    pub noise_penalty: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            baseline: 0.15,
            tempo_dominance: 0.30,
            phase_lock: 0.25,
            onset_agreement: 0.30,
            noise_penalty: 0.25,
        }
    }
}

/// Render-domain clock tuning
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockTuning {
    /// Time constant of the smoothed BPM, in seconds
    pub bpm_tau: f32,
    /// Time constant of the clock-side confidence decay, in seconds
    pub confidence_tau: f32,
    /// Time constant of the beat strength decay, in seconds
    pub beat_strength_tau: f32,
    /// Fraction of the beat phase error removed per observation
    pub phase_correction_gain: f32,
    /// Fraction of the bar phase error removed per downbeat observation
    pub bar_correction_gain: f32,
    /// Lowest target BPM the clock accepts
    pub bpm_min: f32,
    /// Highest target BPM the clock accepts
    pub bpm_max: f32,
    pub beats_per_bar: u8,
    pub beat_unit: u8,
}

impl Default for ClockTuning {
    fn default() -> Self {
        Self {
            bpm_tau: 0.5,
            confidence_tau: 1.0,
            beat_strength_tau: 0.15,
            phase_correction_gain: 0.35,
            bar_correction_gain: 0.20,
            bpm_min: 30.0,
            bpm_max: 300.0,
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

impl ClockTuning {
    pub fn with_time_signature(mut self, beats_per_bar: u8, beat_unit: u8) -> Self {
        self.beats_per_bar = beats_per_bar;
        self.beat_unit = beat_unit;
        self
    }

    pub fn with_correction_gains(mut self, phase: f32, bar: f32) -> Self {
        self.phase_correction_gain = phase;
        self.bar_correction_gain = bar;
        self
    }

    pub fn with_bpm_tau(mut self, tau: f32) -> Self {
        self.bpm_tau = tau;
        self
    }
}

/// Complete configuration of the analysis pipeline and its clock
///
/// # Example
///
/// ```
/// use taktgeber::{PipelineConfig, TactusConfig};
///
/// let config = PipelineConfig::default()
///     .with_hop(16_000, 256)
///     .with_tactus(TactusConfig::default().with_switching(1.2, 10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Samples per analysis hop
    pub hop_size: usize,
    /// Hops between two candidate/tactus/confidence cycles
    pub hops_per_cycle: usize,
    pub novelty: NoveltyConfig,
    pub resonator: ResonatorConfig,
    pub tactus: TactusConfig,
    pub confidence: ConfidenceWeights,
    pub clock: ClockTuning,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            hop_size: 256,
            hops_per_cycle: 6,
            novelty: NoveltyConfig::default(),
            resonator: ResonatorConfig::default(),
            tactus: TactusConfig::default(),
            confidence: ConfidenceWeights::default(),
            clock: ClockTuning::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_hop(mut self, sample_rate: u32, hop_size: usize) -> Self {
        self.sample_rate = sample_rate;
        self.hop_size = hop_size;
        self
    }

    pub fn with_hops_per_cycle(mut self, hops: usize) -> Self {
        self.hops_per_cycle = hops;
        self
    }

    pub fn with_novelty(mut self, novelty: NoveltyConfig) -> Self {
        self.novelty = novelty;
        self
    }

    pub fn with_resonator(mut self, resonator: ResonatorConfig) -> Self {
        self.resonator = resonator;
        self
    }

    pub fn with_tactus(mut self, tactus: TactusConfig) -> Self {
        self.tactus = tactus;
        self
    }

    pub fn with_confidence(mut self, weights: ConfidenceWeights) -> Self {
        self.confidence = weights;
        self
    }

    pub fn with_clock(mut self, clock: ClockTuning) -> Self {
        self.clock = clock;
        self
    }

    /// Duration of one hop in seconds
    #[inline]
    pub fn hop_secs(&self) -> f32 {
        self.hop_size as f32 / self.sample_rate as f32
    }

    /// Check every parameter the pipeline depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 || self.hop_size == 0 {
            return Err(ConfigError::InvalidParameter(format!(
                "sample_rate ({}) and hop_size ({}) must be non-zero",
                self.sample_rate, self.hop_size
            )));
        }
        if self.hops_per_cycle == 0 {
            return Err(ConfigError::InvalidParameter(
                "hops_per_cycle must be non-zero".to_string(),
            ));
        }
        if self.novelty.window_len < 3 {
            return Err(ConfigError::InvalidParameter(format!(
                "novelty window_len must be at least 3 hops, got {}",
                self.novelty.window_len
            )));
        }

        let r = &self.resonator;
        if r.min_bpm <= 0.0 || r.max_bpm <= r.min_bpm {
            return Err(ConfigError::InvalidBpmRange {
                min_bpm: r.min_bpm,
                max_bpm: r.max_bpm,
            });
        }
        if r.bpm_step <= 0.0 || r.window_secs <= 0.0 || r.dc_secs <= 0.0 {
            return Err(ConfigError::InvalidParameter(format!(
                "bpm_step ({:.3}), window_secs ({:.3}) and dc_secs ({:.3}) must be positive",
                r.bpm_step, r.window_secs, r.dc_secs
            )));
        }
        if r.top_k == 0 || r.top_k > MAX_CANDIDATES {
            return Err(ConfigError::InvalidParameter(format!(
                "top_k must be in 1..={}, got {}",
                MAX_CANDIDATES, r.top_k
            )));
        }
        // the fastest resonator must stay well below the hop Nyquist rate
        let nyquist_bpm = 60.0 / (2.0 * self.hop_secs());
        if r.max_bpm >= nyquist_bpm {
            return Err(ConfigError::InvalidParameter(format!(
                "max_bpm {:.1} exceeds the hop-rate limit of {:.1}",
                r.max_bpm, nyquist_bpm
            )));
        }

        let t = &self.tactus;
        if t.switch_ratio < 1.0 || t.switch_cycles == 0 {
            return Err(ConfigError::InvalidParameter(format!(
                "switch_ratio ({:.3}) must be >= 1 and switch_cycles ({}) non-zero",
                t.switch_ratio, t.switch_cycles
            )));
        }
        if !(0.0..=1.0).contains(&t.locked_blend) || !(0.0..=1.0).contains(&t.unlocked_blend) {
            return Err(ConfigError::InvalidParameter(
                "BPM blend factors must be in [0, 1]".to_string(),
            ));
        }
        if t.harmonic_ratio <= 0.0 || t.catch_up_bpm < 0.0 {
            return Err(ConfigError::InvalidParameter(format!(
                "harmonic_ratio ({:.3}) must be positive and catch_up_bpm ({:.3}) non-negative",
                t.harmonic_ratio, t.catch_up_bpm
            )));
        }
        if t.prior_sigma_bpm <= 0.0 {
            return Err(ConfigError::InvalidParameter(
                "prior_sigma_bpm must be positive".to_string(),
            ));
        }
        t.thresholds.validate()?;

        let c = &self.clock;
        if c.beats_per_bar == 0 || c.beat_unit == 0 {
            return Err(ConfigError::InvalidParameter(
                "time signature must be non-zero".to_string(),
            ));
        }
        if c.bpm_min <= 0.0 || c.bpm_max <= c.bpm_min {
            return Err(ConfigError::InvalidBpmRange {
                min_bpm: c.bpm_min,
                max_bpm: c.bpm_max,
            });
        }
        if !(0.0..=1.0).contains(&c.phase_correction_gain)
            || !(0.0..=1.0).contains(&c.bar_correction_gain)
        {
            return Err(ConfigError::InvalidParameter(
                "correction gains must be in [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn reference_geometry() {
        let config = PipelineConfig::default();
        assert_eq!(config.resonator.num_resonators(), 121);
        assert!((config.hop_secs() - 0.016).abs() < 1e-6);
    }

    #[test]
    fn narrow_hysteresis_rejected() {
        let thresholds = StateThresholds {
            lost_to_coast: 0.30,
            coast_to_lost: 0.25,
            ..StateThresholds::default()
        };
        let config = PipelineConfig::default()
            .with_tactus(TactusConfig::default().with_thresholds(thresholds));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHysteresis { .. })
        ));
    }

    #[test]
    fn inverted_bpm_range_rejected() {
        let config = PipelineConfig::default()
            .with_resonator(ResonatorConfig::default().with_bpm_range(180.0, 60.0));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBpmRange { .. })
        ));
    }

    #[test]
    fn oversized_top_k_rejected() {
        let config = PipelineConfig::default()
            .with_resonator(ResonatorConfig::default().with_top_k(MAX_CANDIDATES + 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_time_signature_rejected() {
        let config = PipelineConfig::default()
            .with_clock(ClockTuning::default().with_time_signature(0, 4));
        assert!(config.validate().is_err());
    }
}
