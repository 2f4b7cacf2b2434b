//! Values exchanged between the analysis loop and the render loop.

use crate::analysis::TrackerState;
use crate::config::NUM_BANDS;
use crate::time::AudioTime;

/// One hop of calibrated input from the band energy provider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AudioHop {
    /// Time of the first sample of the hop
    pub time: AudioTime,
    /// Per-band spectral energies in `[0, 1]`, lowest band first
    pub bands: [f32; NUM_BANDS],
}

impl AudioHop {
    pub fn new(time: AudioTime, bands: [f32; NUM_BANDS]) -> Self {
        Self { time, bands }
    }

    pub fn silent(time: AudioTime) -> Self {
        Self {
            time,
            bands: [0.0; NUM_BANDS],
        }
    }
}

/// Onset of a single band group.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Trigger {
    pub fired: bool,
    pub strength: f32,
}

impl Trigger {
    #[inline]
    pub(crate) fn from_peak(peak: Option<f32>) -> Self {
        match peak {
            Some(strength) => Self {
                fired: true,
                strength,
            },
            None => Self::default(),
        }
    }
}

/// Kick, snare and hi-hat equivalent onsets of one hop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct OnsetTriggers {
    /// Bands 0 and 1
    pub kick: Trigger,
    /// Bands 2 and 3
    pub snare: Trigger,
    /// Bands 6 and 7
    pub hihat: Trigger,
}

/// An onset the tracker believes sits on a beat.
///
/// `time` is when the onset happened, which lies one hop before the frame
/// that carries it.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BeatObservation {
    pub time: AudioTime,
    /// Onset strength in `[0, 1]`
    pub strength: f32,
    /// Accented low-band onset, taken as the first beat of a bar
    pub downbeat: bool,
}

/// Everything the analysis loop knows after one hop.
///
/// Published once per hop and never modified afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalysisFrame {
    pub time: AudioTime,
    /// Number of hops processed since the last restart
    pub hop_seq: u64,
    /// Incremented on every stream restart
    pub epoch: u32,
    pub novelty: f32,
    pub bands: [f32; NUM_BANDS],
    /// Smoothed tempo estimate
    pub bpm: f32,
    pub confidence: f32,
    pub state: TrackerState,
    /// Whether a broadband onset peaked on the previous hop
    pub onset: bool,
    pub onset_strength: f32,
    pub triggers: OnsetTriggers,
    pub beat: Option<BeatObservation>,
    /// No significant novelty for a while
    pub silent: bool,
}

impl Default for AnalysisFrame {
    fn default() -> Self {
        Self {
            time: AudioTime::default(),
            hop_seq: 0,
            epoch: 0,
            novelty: 0.0,
            bands: [0.0; NUM_BANDS],
            bpm: 120.0,
            confidence: 0.0,
            state: TrackerState::Lost,
            onset: false,
            onset_strength: 0.0,
            triggers: OnsetTriggers::default(),
            beat: None,
            silent: true,
        }
    }
}

/// Phase-lock diagnostics the clock sends back to the analysis loop.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ClockFeedback {
    /// Render time of the tick that produced this feedback
    pub time: AudioTime,
    /// Running mean of the absolute beat phase error at observations, in beats
    pub phase_residual: f32,
    /// Time of the most recent observation the clock corrected against
    pub last_correction: Option<AudioTime>,
}

impl Default for ClockFeedback {
    fn default() -> Self {
        Self {
            time: AudioTime::default(),
            phase_residual: 0.5,
            last_correction: None,
        }
    }
}
