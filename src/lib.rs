//! Real-time tempo tracking and a phase-locked musical clock.
//!
//! Two loops cooperate without ever blocking each other:
//!
//! - the **analysis loop** feeds one [`AudioHop`] of band energies at a time
//!   into a [`BeatTracker`], which detects onsets, resonates on candidate
//!   tempos, picks the beat-level tempo and decides how far to trust it;
//! - the **render loop** ticks a [`PhaseLockedClock`] at its own, faster
//!   cadence and reads a continuous beat and bar phase from it.
//!
//! They only talk through two [`SnapshotBuffer`]s: analysis frames flow
//! forward, phase-lock feedback flows back.
//!
//! ```
//! use taktgeber::{pipeline, ClickTrack, HopSource, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let mut parts = pipeline(&config).unwrap();
//! let mut track = ClickTrack::new(120.0, config.sample_rate, config.hop_size);
//!
//! for _ in 0..100 {
//!     let hop = track.next_hop();
//!     parts.tracker.process_hop(&hop);
//!     // two render ticks per hop
//!     parts.clock.tick(hop.time);
//!     parts.clock.tick(hop.time.advanced(config.hop_size as u64 / 2));
//! }
//! assert!(parts.clock.snapshot().beat_phase < 1.0);
//! ```

pub mod analysis;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod snapshot;
pub mod source;
pub mod time;
pub mod tracker;

pub use analysis::{CandidateSet, TempoCandidate, TrackerState};
pub use clock::{ClockHandle, ClockMessage, ClockSnapshot, PhaseLockedClock};
pub use config::{
    ClockTuning, ConfidenceWeights, NoveltyConfig, PipelineConfig, ResonatorConfig,
    StateThresholds, TactusConfig, MAX_CANDIDATES, NUM_BANDS,
};
pub use error::ConfigError;
pub use frame::{AnalysisFrame, AudioHop, BeatObservation, ClockFeedback, OnsetTriggers, Trigger};
pub use snapshot::{SnapshotBuffer, SnapshotPublisher, SnapshotReader};
pub use source::{ClickTrack, HopSource, Silence};
pub use time::AudioTime;
pub use tracker::BeatTracker;

/// A tracker and a clock wired together, ready to be moved onto their
/// respective threads.
pub struct Pipeline {
    pub tracker: BeatTracker,
    pub clock: PhaseLockedClock,
    pub handle: ClockHandle,
}

/// Validate `config` and connect a [`BeatTracker`] to a [`PhaseLockedClock`].
pub fn pipeline(config: &PipelineConfig) -> Result<Pipeline, ConfigError> {
    let (frames_tx, frames_rx) = SnapshotBuffer::new(AnalysisFrame::default());
    let (feedback_tx, feedback_rx) = SnapshotBuffer::new(ClockFeedback::default());

    let tracker = BeatTracker::new(config, frames_tx, feedback_rx)?;
    let (clock, handle) = PhaseLockedClock::new(config.clock, frames_rx, feedback_tx);

    Ok(Pipeline {
        tracker,
        clock,
        handle,
    })
}
