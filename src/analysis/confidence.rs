//! Bounded tempo confidence from four independent components.

use crate::config::ConfidenceWeights;
use crate::frame::ClockFeedback;
use crate::time::AudioTime;

// onset agreement
const AGREEMENT_SIGMA: f32 = 0.1;
const AGREEMENT_ALPHA: f32 = 0.15;
const AGREEMENT_HOLD_SECS: f64 = 1.5;
const AGREEMENT_DECAY_SECS: f32 = 1.0;

// phase lock quality
const RESIDUAL_SCALE: f32 = 0.25;
const FRESH_SECS: f64 = 2.0;
const STALE_DECAY_SECS: f64 = 1.0;

// noise penalty
const ENVELOPE_DECAY_SECS: f32 = 1.0;
const SILENCE_LEVEL: f32 = 0.1;
/// Envelope values below this are flushed to zero
const ENVELOPE_FLOOR: f32 = SILENCE_LEVEL * 1e-3;
const ONSET_RATE_SECS: f32 = 2.0;
const CHAOS_ONSET_RATE: f32 = 6.0;

/// Values of the individual confidence terms, each in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConfidenceComponents {
    pub tempo_dominance: f32,
    pub phase_lock: f32,
    pub onset_agreement: f32,
    pub noise_penalty: f32,
}

impl ConfidenceComponents {
    /// Weighted sum clamped to `[0, 1]`.
    pub fn combine(&self, weights: &ConfidenceWeights) -> f32 {
        let c = weights.baseline
            + weights.tempo_dominance * self.tempo_dominance.clamp(0.0, 1.0)
            + weights.phase_lock * self.phase_lock.clamp(0.0, 1.0)
            + weights.onset_agreement * self.onset_agreement.clamp(0.0, 1.0)
            - weights.noise_penalty * self.noise_penalty.clamp(0.0, 1.0);
        if c.is_nan() {
            return 0.0;
        }
        c.clamp(0.0, 1.0)
    }
}

/// Tracks onset agreement and signal activity per hop and turns them into a
/// confidence score once per analysis cycle.
pub struct ConfidenceEstimator {
    weights: ConfidenceWeights,
    hop_secs: f32,
    agreement: f32,
    last_onset: Option<AudioTime>,
    envelope: f32,
    onset_rate: f32,
    components: ConfidenceComponents,
    confidence: f32,
}

impl ConfidenceEstimator {
    pub fn new(weights: ConfidenceWeights, hop_secs: f32) -> Self {
        Self {
            weights,
            hop_secs,
            agreement: 0.0,
            last_onset: None,
            envelope: 0.0,
            onset_rate: 0.0,
            components: ConfidenceComponents::default(),
            confidence: 0.0,
        }
    }

    /// Account for one hop.
    ///
    /// `beat_error` is the signed distance, in beats, between an onset that
    /// fired on this hop and the nearest predicted beat.
    pub fn observe_hop(
        &mut self,
        time: AudioTime,
        novelty: f32,
        onset: bool,
        beat_error: Option<f32>,
    ) {
        let hop = self.hop_secs;

        self.envelope = novelty.max(self.envelope * (-hop / ENVELOPE_DECAY_SECS).exp());
        if self.envelope < ENVELOPE_FLOOR {
            self.envelope = 0.0;
        }

        let rate_alpha = 1.0 - (-hop / ONSET_RATE_SECS).exp();
        let instant = if onset { 1.0 / hop } else { 0.0 };
        self.onset_rate += rate_alpha * (instant - self.onset_rate);

        match beat_error {
            Some(error) if onset => {
                let z = error / AGREEMENT_SIGMA;
                let agreement = (-0.5 * z * z).exp();
                self.agreement += AGREEMENT_ALPHA * (agreement - self.agreement);
                self.last_onset = Some(time);
            }
            _ => {
                let idle = self
                    .last_onset
                    .map_or(f64::INFINITY, |t| time.seconds_since(&t));
                if idle > AGREEMENT_HOLD_SECS {
                    self.agreement *= (-hop / AGREEMENT_DECAY_SECS).exp();
                }
            }
        }
    }

    /// Confidence for the cycle ending at `time`.
    pub fn estimate(&mut self, time: AudioTime, dominance: f32, feedback: &ClockFeedback) -> f32 {
        let silence = self.silence();
        let chaos = ((self.onset_rate - CHAOS_ONSET_RATE) / CHAOS_ONSET_RATE).clamp(0.0, 1.0);

        self.components = ConfidenceComponents {
            tempo_dominance: dominance.clamp(0.0, 1.0) * (1.0 - silence),
            phase_lock: phase_lock_quality(time, feedback),
            onset_agreement: self.agreement,
            noise_penalty: silence.max(chaos),
        };
        self.confidence = self.components.combine(&self.weights);
        self.confidence
    }

    /// How close the input is to silence, `[0, 1]`
    #[inline]
    pub fn silence(&self) -> f32 {
        (1.0 - self.envelope / SILENCE_LEVEL).clamp(0.0, 1.0)
    }

    #[inline]
    pub fn components(&self) -> ConfidenceComponents {
        self.components
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Smoothed onset rate in onsets per second
    #[inline]
    pub fn onset_rate(&self) -> f32 {
        self.onset_rate
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.weights, self.hop_secs);
    }
}

fn phase_lock_quality(time: AudioTime, feedback: &ClockFeedback) -> f32 {
    let Some(last) = feedback.last_correction else {
        return 0.0;
    };
    let age = time.seconds_since(&last).max(0.0);
    let freshness = if age <= FRESH_SECS {
        1.0
    } else {
        (-(age - FRESH_SECS) / STALE_DECAY_SECS).exp() as f32
    };
    (1.0 - feedback.phase_residual / RESIDUAL_SCALE).clamp(0.0, 1.0) * freshness
}
