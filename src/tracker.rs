//! The analysis loop: one call per audio hop.

use tracing::{info, trace};

use crate::analysis::{
    wrap_half, ConfidenceComponents, ConfidenceEstimator, NoveltyDetector, TactusResolver,
    TempoResonatorBank, TrackerState,
};
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::frame::{AnalysisFrame, AudioHop, BeatObservation, ClockFeedback};
use crate::snapshot::{SnapshotPublisher, SnapshotReader};

/// Onsets further than this from the predicted beat are not sent to the clock
const BEAT_GATE: f32 = 0.25;
/// A kick this much above the running kick level is taken as a downbeat
const DOWNBEAT_ACCENT: f32 = 1.3;
const KICK_LEVEL_ALPHA: f32 = 0.1;
/// Silence level above which a frame is flagged silent
const SILENT_LEVEL: f32 = 0.5;

/// Owns every analysis component and publishes one [`AnalysisFrame`] per hop.
pub struct BeatTracker {
    config: PipelineConfig,
    novelty: NoveltyDetector,
    bank: TempoResonatorBank,
    tactus: TactusResolver,
    confidence: ConfidenceEstimator,
    frames: SnapshotPublisher<AnalysisFrame>,
    feedback: SnapshotReader<ClockFeedback>,
    hop_seq: u64,
    epoch: u32,
    kick_level: f32,
    last_frame: AnalysisFrame,
}

impl BeatTracker {
    /// Validate `config` and build a tracker publishing into `frames`.
    pub fn new(
        config: &PipelineConfig,
        frames: SnapshotPublisher<AnalysisFrame>,
        feedback: SnapshotReader<ClockFeedback>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let hop_secs = config.hop_secs();
        Ok(Self {
            config: *config,
            novelty: NoveltyDetector::new(config.novelty),
            bank: TempoResonatorBank::new(config.resonator, hop_secs),
            tactus: TactusResolver::new(config.tactus),
            confidence: ConfidenceEstimator::new(config.confidence, hop_secs),
            frames,
            feedback,
            hop_seq: 0,
            epoch: 0,
            kick_level: 0.0,
            last_frame: AnalysisFrame::default(),
        })
    }

    /// Run one hop through the pipeline and publish the resulting frame.
    pub fn process_hop(&mut self, hop: &AudioHop) -> AnalysisFrame {
        let hop_secs = self.config.hop_secs();
        let out = self.novelty.process(&hop.bands);
        self.bank.process(out.novelty);
        self.hop_seq += 1;

        // onsets are reported one hop late, so compare against the phase
        // the incumbent resonator had one hop ago
        let beat_error = match (out.onset, self.tactus.incumbent()) {
            (Some(_), Some(bpm)) => {
                let phase = self.bank.beat_phase_at(bpm);
                Some(wrap_half(phase - bpm / 60.0 * hop_secs))
            }
            _ => None,
        };
        self.confidence
            .observe_hop(hop.time, out.novelty, out.onset.is_some(), beat_error);

        let kick = out.triggers.kick;
        let downbeat =
            kick.fired && self.kick_level > 0.0 && kick.strength >= DOWNBEAT_ACCENT * self.kick_level;
        if kick.fired {
            self.kick_level += KICK_LEVEL_ALPHA * (kick.strength - self.kick_level);
        }

        if self.hop_seq % self.config.hops_per_cycle as u64 == 0 {
            self.run_cycle(hop);
        }

        let state = self.tactus.state();
        let beat = match (out.onset, beat_error) {
            (Some(strength), Some(error))
                if state != TrackerState::Lost && error.abs() <= BEAT_GATE =>
            {
                Some(BeatObservation {
                    time: hop.time.rewound(self.config.hop_size as u64),
                    strength: strength.clamp(0.0, 1.0),
                    downbeat,
                })
            }
            _ => None,
        };

        let frame = AnalysisFrame {
            time: hop.time,
            hop_seq: self.hop_seq,
            epoch: self.epoch,
            novelty: out.novelty,
            bands: hop.bands,
            bpm: self.tactus.smoothed_bpm().unwrap_or(self.last_frame.bpm),
            confidence: self.confidence.confidence(),
            state,
            onset: out.onset.is_some(),
            onset_strength: out.onset.unwrap_or(0.0),
            triggers: out.triggers,
            beat,
            silent: self.confidence.silence() > SILENT_LEVEL,
        };

        self.frames.publish(frame);
        self.last_frame = frame;
        frame
    }

    fn run_cycle(&mut self, hop: &AudioHop) {
        let feedback = self.feedback.read();
        let candidates = self.bank.candidates();
        let decision = self.tactus.update(&candidates);
        let confidence = self
            .confidence
            .estimate(hop.time, decision.dominance, &feedback);
        self.tactus.apply_confidence(confidence);

        let c = self.confidence.components();
        trace!(
            hop = self.hop_seq,
            candidates = candidates.len(),
            incumbent = ?decision.incumbent_bpm,
            confidence,
            dominance = c.tempo_dominance,
            phase_lock = c.phase_lock,
            agreement = c.onset_agreement,
            penalty = c.noise_penalty,
            "analysis cycle"
        );
    }

    /// Reinitialize every component after a stream restart.
    ///
    /// Frames published afterwards carry a new epoch, which makes the clock
    /// reset its phase as well.
    pub fn restart(&mut self) {
        self.novelty.reset();
        self.bank.reset();
        self.tactus.reset();
        self.confidence.reset();
        self.hop_seq = 0;
        self.kick_level = 0.0;
        self.epoch = self.epoch.wrapping_add(1);
        info!(epoch = self.epoch, "stream restart");

        self.last_frame = AnalysisFrame {
            epoch: self.epoch,
            ..AnalysisFrame::default()
        };
        self.frames.publish(self.last_frame);
    }

    #[inline]
    pub fn state(&self) -> TrackerState {
        self.tactus.state()
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence.confidence()
    }

    #[inline]
    pub fn components(&self) -> ConfidenceComponents {
        self.confidence.components()
    }

    /// Smoothed tempo, once one has been chosen
    #[inline]
    pub fn bpm(&self) -> Option<f32> {
        self.tactus.smoothed_bpm()
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    #[inline]
    pub fn hop_seq(&self) -> u64 {
        self.hop_seq
    }

    /// Most recently published frame
    #[inline]
    pub fn last_frame(&self) -> &AnalysisFrame {
        &self.last_frame
    }

    #[inline]
    pub fn resonators(&self) -> &TempoResonatorBank {
        &self.bank
    }

    #[inline]
    pub fn tactus(&self) -> &TactusResolver {
        &self.tactus
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
