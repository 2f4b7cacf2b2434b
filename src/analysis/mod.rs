//! Analysis-loop components, leaves first.

pub mod confidence;
pub mod novelty;
pub mod resonator;
pub mod tactus;

pub use confidence::{ConfidenceComponents, ConfidenceEstimator};
pub use novelty::{NoveltyDetector, NoveltyOutput, PeakPicker};
pub use resonator::{CandidateSet, TempoCandidate, TempoResonatorBank};
pub use tactus::{TactusDecision, TactusResolver, TrackerState};

/// Map a phase in `[0, 1)` to the signed shortest distance from a whole
/// beat, in `[-0.5, 0.5)`.
#[inline]
pub fn wrap_half(phase: f32) -> f32 {
    let p = phase - phase.floor();
    if p >= 0.5 {
        p - 1.0
    } else {
        p
    }
}

/// `f64` flavour of [`wrap_half`] for the clock's beat counter.
#[inline]
pub(crate) fn wrap_half_f64(phase: f64) -> f64 {
    let p = phase - phase.floor();
    if p >= 0.5 {
        p - 1.0
    } else {
        p
    }
}
