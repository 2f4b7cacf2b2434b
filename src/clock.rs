//! Render-domain phase-locked musical clock.
//!
//! The clock free-runs a continuous beat counter at the smoothed tempo and
//! pulls it toward the beat observations the analysis loop reports. It never
//! waits on the analysis loop: each tick reads whatever frame was published
//! last and extrapolates from there.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::analysis::{wrap_half_f64, TrackerState};
use crate::config::ClockTuning;
use crate::frame::{AnalysisFrame, BeatObservation, ClockFeedback};
use crate::snapshot::{SnapshotPublisher, SnapshotReader};
use crate::time::AudioTime;

const MESSAGE_CAPACITY: usize = 32;
/// Observations waiting for render time to reach them
const PENDING_CAPACITY: usize = 8;
const RESIDUAL_ALPHA: f32 = 0.2;
const DEFAULT_BPM: f32 = 120.0;

/// Control messages for a running [`PhaseLockedClock`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClockMessage {
    /// Beats per bar and beat unit; zero falls back to 4
    SetTimeSignature(u8, u8),
    SetTuning(ClockTuning),
    /// Return phase, tempo and confidence to neutral
    Reset,
    /// Follow [`ClockMessage::ExternalBeat`]s instead of the analysis loop,
    /// or hand control back to it
    SetExternalSync(bool),
    /// Tempo and position from an external beat source. Ignored unless
    /// external sync is on.
    ExternalBeat {
        bpm: f32,
        /// Position within the beat, `[0, 1)`
        phase: f32,
        /// Out-of-range values count as the downbeat
        beat_in_bar: u8,
    },
}

/// Sending half of the clock's message queue.
pub struct ClockHandle {
    sender: rtrb::Producer<ClockMessage>,
}

impl ClockHandle {
    /// Queue a message for the next tick; hands it back if the queue is full.
    pub fn send(&mut self, msg: ClockMessage) -> Result<(), ClockMessage> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }
}

/// What renderers read every tick.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ClockSnapshot {
    pub time: AudioTime,
    /// Smoothed tempo
    pub bpm: f32,
    /// Clock-side tempo confidence, `[0, 1]`
    pub confidence: f32,
    /// Position within the current beat, `[0, 1)`
    pub beat_phase: f32,
    /// Position within the current bar, `[0, 1)`
    pub bar_phase: f32,
    pub beat_index: u64,
    pub bar_index: u64,
    pub beat_in_bar: u8,
    pub beats_per_bar: u8,
    pub beat_unit: u8,
    /// A beat boundary was crossed on this tick
    pub beat_tick: bool,
    /// A bar boundary was crossed on this tick
    pub bar_tick: bool,
    /// Strength of the last observed beat, decaying quickly
    pub beat_strength: f32,
    /// Tracker state of the latest analysis frame
    pub state: TrackerState,
}

impl Default for ClockSnapshot {
    fn default() -> Self {
        Self {
            time: AudioTime::default(),
            bpm: DEFAULT_BPM,
            confidence: 0.0,
            beat_phase: 0.0,
            bar_phase: 0.0,
            beat_index: 0,
            bar_index: 0,
            beat_in_bar: 0,
            beats_per_bar: 4,
            beat_unit: 4,
            beat_tick: false,
            bar_tick: false,
            beat_strength: 0.0,
            state: TrackerState::Lost,
        }
    }
}

/// Beat and bar phase generator running at render cadence.
pub struct PhaseLockedClock {
    tuning: ClockTuning,
    frames: SnapshotReader<AnalysisFrame>,
    feedback: SnapshotPublisher<ClockFeedback>,
    messages: rtrb::Consumer<ClockMessage>,

    epoch: u32,
    last_hop_seq: u64,
    state: TrackerState,
    last_tick: Option<AudioTime>,

    bpm_target: f32,
    bpm_smoothed: f32,
    confidence: f32,
    beat_strength: f32,

    beat_float: f64,
    bar_offset: f64,
    beat_index: i64,
    bar_index: i64,

    pending: VecDeque<BeatObservation>,
    external: bool,
    residual: f32,
    last_correction: Option<AudioTime>,

    snapshot: ClockSnapshot,
}

impl PhaseLockedClock {
    pub fn new(
        tuning: ClockTuning,
        frames: SnapshotReader<AnalysisFrame>,
        feedback: SnapshotPublisher<ClockFeedback>,
    ) -> (Self, ClockHandle) {
        let (sender, messages) = rtrb::RingBuffer::new(MESSAGE_CAPACITY);
        let mut clock = Self {
            tuning,
            frames,
            feedback,
            messages,
            epoch: 0,
            last_hop_seq: 0,
            state: TrackerState::Lost,
            last_tick: None,
            bpm_target: DEFAULT_BPM,
            bpm_smoothed: DEFAULT_BPM,
            confidence: 0.0,
            beat_strength: 0.0,
            beat_float: 0.0,
            bar_offset: 0.0,
            beat_index: 0,
            bar_index: 0,
            pending: VecDeque::with_capacity(PENDING_CAPACITY),
            external: false,
            residual: ClockFeedback::default().phase_residual,
            last_correction: None,
            snapshot: ClockSnapshot::default(),
        };
        clock.reset();
        (clock, ClockHandle { sender })
    }

    /// Advance the clock to `now` and return the new snapshot.
    pub fn tick(&mut self, now: AudioTime) -> ClockSnapshot {
        self.drain_messages();
        self.absorb_frame();

        self.snapshot.beat_tick = false;
        self.snapshot.bar_tick = false;

        let Some(last) = self.last_tick else {
            // the first tick only seeds the timebase
            self.last_tick = Some(now);
            self.update_snapshot(now);
            return self.snapshot;
        };

        let dt = now.seconds_since(&last);
        if dt < 0.0 {
            debug!(dt, "render time went backwards, tick ignored");
            return self.snapshot;
        }
        let dt_f32 = dt as f32;

        let t = &self.tuning;
        let alpha = if t.bpm_tau > 0.0 {
            1.0 - (-dt_f32 / t.bpm_tau).exp()
        } else {
            1.0
        };
        self.bpm_smoothed += alpha * (self.bpm_target - self.bpm_smoothed);
        if !self.external {
            self.confidence *= decay(dt_f32, t.confidence_tau);
        }
        self.beat_strength *= decay(dt_f32, t.beat_strength_tau);

        self.beat_float += dt * self.bpm_smoothed as f64 / 60.0;

        // one correction per tick keeps the per-tick pull bounded
        if self
            .pending
            .front()
            .is_some_and(|o| now.sample_index >= o.time.sample_index)
        {
            if let Some(observation) = self.pending.pop_front() {
                self.correct(now, &observation);
            }
        }

        self.last_tick = Some(now);
        self.update_snapshot(now);
        self.feedback.publish(ClockFeedback {
            time: now,
            phase_residual: self.residual,
            last_correction: self.last_correction,
        });
        self.snapshot
    }

    /// Latest snapshot without advancing time
    #[inline]
    pub fn snapshot(&self) -> &ClockSnapshot {
        &self.snapshot
    }

    /// Continuous beat counter
    #[inline]
    pub fn beat_position(&self) -> f64 {
        self.beat_float
    }

    /// Largest amount a single correction can move the beat counter
    #[inline]
    pub fn max_correction(&self) -> f64 {
        0.5 * self.tuning.phase_correction_gain as f64
    }

    /// Observations received but not yet applied
    #[inline]
    pub fn pending_observations(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.external
    }

    #[inline]
    pub fn tuning(&self) -> &ClockTuning {
        &self.tuning
    }

    /// Return to the neutral state, keeping tuning and time signature.
    pub fn reset(&mut self) {
        self.last_tick = None;
        self.bpm_target = DEFAULT_BPM;
        self.bpm_smoothed = DEFAULT_BPM;
        self.confidence = 0.0;
        self.beat_strength = 0.0;
        self.beat_float = 0.0;
        self.bar_offset = 0.0;
        self.beat_index = 0;
        self.bar_index = 0;
        self.pending.clear();
        self.residual = ClockFeedback::default().phase_residual;
        self.last_correction = None;
        self.snapshot = ClockSnapshot {
            beats_per_bar: self.tuning.beats_per_bar,
            beat_unit: self.tuning.beat_unit,
            state: self.state,
            ..ClockSnapshot::default()
        };
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.messages.pop() {
            match msg {
                ClockMessage::SetTimeSignature(beats_per_bar, beat_unit) => {
                    self.set_time_signature(beats_per_bar, beat_unit)
                }
                ClockMessage::SetTuning(tuning) => {
                    let (beats_per_bar, beat_unit) = (tuning.beats_per_bar, tuning.beat_unit);
                    self.tuning = tuning;
                    self.set_time_signature(beats_per_bar, beat_unit);
                }
                ClockMessage::Reset => {
                    info!("clock reset");
                    self.reset();
                }
                ClockMessage::SetExternalSync(enabled) => {
                    if enabled != self.external {
                        info!(enabled, "external sync");
                    }
                    self.external = enabled;
                    self.pending.clear();
                }
                ClockMessage::ExternalBeat {
                    bpm,
                    phase,
                    beat_in_bar,
                } => self.external_beat(bpm, phase, beat_in_bar),
            }
        }
    }

    /// Jump straight to an externally supplied tempo and position.
    ///
    /// The beat counter moves to the nearest position with the given phase,
    /// so indices stay monotonic across injections.
    fn external_beat(&mut self, bpm: f32, phase: f32, beat_in_bar: u8) {
        if !self.external {
            debug!(bpm, "external beat ignored outside external sync");
            return;
        }
        let bpm = bpm.clamp(self.tuning.bpm_min, self.tuning.bpm_max);
        self.bpm_target = bpm;
        self.bpm_smoothed = bpm;
        self.confidence = 1.0;

        let phase = if phase.is_finite() { phase.clamp(0.0, 1.0) as f64 } else { 0.0 };
        let current = self.beat_float - self.beat_float.floor();
        self.beat_float += wrap_half_f64(phase - current);

        let beats_per_bar = self.tuning.beats_per_bar.max(1) as i64;
        let beat_in_bar = if (beat_in_bar as i64) < beats_per_bar { beat_in_bar as i64 } else { 0 };
        // the index the next snapshot will report, held boundaries included
        let floor = (self.beat_float.floor() as i64).max(self.beat_index);
        let shift = (beat_in_bar - floor - self.bar_offset.round() as i64).rem_euclid(beats_per_bar);
        // smallest signed shift onto the requested beat
        let shift = if shift > beats_per_bar / 2 { shift - beats_per_bar } else { shift };
        self.bar_offset = (self.bar_offset.round() as i64 + shift) as f64;
    }

    fn set_time_signature(&mut self, beats_per_bar: u8, beat_unit: u8) {
        let beats_per_bar = if beats_per_bar == 0 { 4 } else { beats_per_bar };
        let beat_unit = if beat_unit == 0 { 4 } else { beat_unit };
        debug!(beats_per_bar, beat_unit, "time signature");
        self.tuning.beats_per_bar = beats_per_bar;
        self.tuning.beat_unit = beat_unit;
        self.snapshot.beats_per_bar = beats_per_bar;
        self.snapshot.beat_unit = beat_unit;
    }

    fn absorb_frame(&mut self) {
        let frame = self.frames.read();
        if frame.epoch != self.epoch {
            info!(epoch = frame.epoch, "clock follows stream restart");
            self.epoch = frame.epoch;
            self.last_hop_seq = frame.hop_seq;
            self.state = frame.state;
            self.reset();
            return;
        }
        if frame.hop_seq == self.last_hop_seq {
            return;
        }
        self.last_hop_seq = frame.hop_seq;
        self.state = frame.state;

        if self.external {
            return;
        }

        self.bpm_target = frame.bpm.clamp(self.tuning.bpm_min, self.tuning.bpm_max);
        let confidence = frame.confidence.clamp(0.0, 1.0);
        if confidence > self.confidence {
            self.confidence = confidence;
        }
        if let Some(beat) = frame.beat {
            self.beat_strength = beat.strength.clamp(0.0, 1.0);
            if self.pending.len() == PENDING_CAPACITY {
                debug!("observation queue full, oldest dropped");
                self.pending.pop_front();
            }
            self.pending.push_back(beat);
        }
    }

    /// Pull the beat counter toward an observed beat.
    ///
    /// The error is evaluated at the observation time, so a late delivery
    /// corrects the phase the clock had when the beat happened.
    fn correct(&mut self, now: AudioTime, observation: &BeatObservation) {
        let beats_back = now.seconds_since(&observation.time) * self.bpm_smoothed as f64 / 60.0;
        let beat_at_obs = self.beat_float - beats_back;
        let error = wrap_half_f64(beat_at_obs);
        let strength = observation.strength.clamp(0.0, 1.0) as f64;

        self.beat_float -= error * self.tuning.phase_correction_gain as f64 * strength;
        self.residual += RESIDUAL_ALPHA * (error.abs() as f32 - self.residual);
        self.last_correction = Some(observation.time);

        if observation.downbeat {
            let beats_per_bar = self.tuning.beats_per_bar.max(1) as f64;
            let bar_at_obs = (beat_at_obs + self.bar_offset) / beats_per_bar;
            let bar_error = wrap_half_f64(bar_at_obs) * beats_per_bar;
            self.bar_offset -= bar_error * self.tuning.bar_correction_gain as f64 * strength;
        }
    }

    fn update_snapshot(&mut self, now: AudioTime) {
        // a backward correction holds the phase at the boundary instead of
        // crossing it a second time
        let beat_floor = self.beat_float.floor() as i64;
        let beat_phase = if beat_floor < self.beat_index {
            0.0
        } else {
            (self.beat_float - self.beat_float.floor()) as f32
        };
        let beat_tick = beat_floor > self.beat_index;
        if beat_tick {
            self.beat_index = beat_floor;
        }

        // bars are counted in whole beats from the nearest whole-beat offset,
        // so a bar only starts on a beat tick with `beat_in_bar == 0`
        let beats_per_bar = self.tuning.beats_per_bar.max(1);
        let beat_in_bar = (self.beat_index + self.bar_offset.round() as i64)
            .rem_euclid(beats_per_bar as i64) as u8;
        let bar_phase = (beat_in_bar as f32 + beat_phase) / beats_per_bar as f32;
        let bar_tick = beat_tick && beat_in_bar == 0;
        if bar_tick {
            self.bar_index += 1;
        }

        self.snapshot = ClockSnapshot {
            time: now,
            bpm: self.bpm_smoothed,
            confidence: self.confidence.clamp(0.0, 1.0),
            beat_phase: clamp_phase(beat_phase),
            bar_phase: clamp_phase(bar_phase),
            beat_index: self.beat_index.max(0) as u64,
            bar_index: self.bar_index.max(0) as u64,
            beat_in_bar,
            beats_per_bar,
            beat_unit: self.tuning.beat_unit,
            beat_tick,
            bar_tick,
            beat_strength: self.beat_strength,
            state: self.state,
        };
    }
}

#[inline]
fn decay(dt: f32, tau: f32) -> f32 {
    if tau > 0.0 {
        (-dt / tau).exp()
    } else {
        0.0
    }
}

// f64 -> f32 rounding can produce exactly 1.0
#[inline]
fn clamp_phase(phase: f32) -> f32 {
    if phase >= 1.0 {
        0.0
    } else {
        phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotBuffer;

    const RATE: u32 = 16_000;
    // 8 ms render ticks
    const TICK: u64 = 128;

    struct Rig {
        clock: PhaseLockedClock,
        handle: ClockHandle,
        frames: SnapshotPublisher<AnalysisFrame>,
        feedback: SnapshotReader<ClockFeedback>,
        hop_seq: u64,
    }

    fn rig() -> Rig {
        let (frames, frames_rx) = SnapshotBuffer::new(AnalysisFrame::default());
        let (feedback_tx, feedback) = SnapshotBuffer::new(ClockFeedback::default());
        let (clock, handle) = PhaseLockedClock::new(ClockTuning::default(), frames_rx, feedback_tx);
        Rig {
            clock,
            handle,
            frames,
            feedback,
            hop_seq: 0,
        }
    }

    impl Rig {
        fn publish(&mut self, bpm: f32, beat: Option<BeatObservation>) {
            self.hop_seq += 1;
            self.frames.publish(AnalysisFrame {
                hop_seq: self.hop_seq,
                bpm,
                confidence: 0.8,
                state: TrackerState::Locked,
                beat,
                ..AnalysisFrame::default()
            });
        }
    }

    fn at(sample: u64) -> AudioTime {
        AudioTime::new(sample, RATE)
    }

    #[test]
    fn free_runs_at_target_tempo() {
        let mut rig = rig();
        rig.publish(120.0, None);
        let mut ticks = 0;
        // a little over 10 seconds
        for i in 0..=1260 {
            if rig.clock.tick(at(i * TICK)).beat_tick {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 20);
        assert!((rig.clock.beat_position() - 20.16).abs() < 1e-6);
    }

    #[test]
    fn first_tick_seeds_timebase() {
        let mut rig = rig();
        let snap = rig.clock.tick(at(1_000_000));
        assert_eq!(snap.beat_phase, 0.0);
        assert_eq!(rig.clock.beat_position(), 0.0);
        rig.clock.tick(at(1_000_000 + 8_000));
        assert!((rig.clock.beat_position() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn backwards_time_is_ignored() {
        let mut rig = rig();
        rig.clock.tick(at(10_000));
        rig.clock.tick(at(12_000));
        let before = rig.clock.beat_position();
        rig.clock.tick(at(11_000));
        assert_eq!(rig.clock.beat_position(), before);
        rig.clock.tick(at(14_000));
        assert!((rig.clock.beat_position() - before - 0.25).abs() < 1e-9);
    }

    #[test]
    fn bpm_target_is_clamped() {
        let mut rig = rig();
        rig.publish(1_000.0, None);
        let mut snap = rig.clock.tick(at(0));
        for i in 1..2_000 {
            snap = rig.clock.tick(at(i * TICK));
        }
        assert!((snap.bpm - 300.0).abs() < 0.01);
    }

    #[test]
    fn observations_pull_phase_into_line() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));

        // true beats sit a third of a beat after the clock's own
        let offset = 8_000 / 3;
        let mut next_beat = offset;
        for i in 1..=2_500u64 {
            let now = i * TICK;
            if now >= next_beat + 256 {
                let beat = BeatObservation {
                    time: at(next_beat),
                    strength: 0.8,
                    downbeat: false,
                };
                rig.publish(120.0, Some(beat));
                next_beat += 8_000;
            }
            rig.clock.tick(at(now));
        }

        let beat_at_last = rig.clock.beat_position()
            - (2_500 * TICK - (next_beat - 8_000)) as f64 / 8_000.0;
        assert!(wrap_half_f64(beat_at_last).abs() < 0.01);
        let feedback = rig.feedback.read();
        assert!(feedback.phase_residual < 0.05);
        assert!(feedback.last_correction.is_some());
    }

    #[test]
    fn corrections_never_exceed_the_maximum_pull() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));
        let max = rig.clock.max_correction();

        let mut prev = rig.clock.beat_position();
        let mut next_beat = 3_000u64;
        for i in 1..=2_000u64 {
            let now = i * TICK;
            if now >= next_beat + 256 {
                let beat = BeatObservation {
                    time: at(next_beat),
                    strength: 1.0,
                    downbeat: i % 3 == 0,
                };
                rig.publish(120.0, Some(beat));
                // irregular beats keep the error large
                next_beat += 5_000 + (i % 7) * 700;
            }
            let snap = rig.clock.tick(at(now));
            let pos = rig.clock.beat_position();
            let free = TICK as f64 / RATE as f64 * snap.bpm as f64 / 60.0;
            assert!((pos - prev - free).abs() <= max + 1e-9);
            assert!((0.0..1.0).contains(&snap.beat_phase));
            assert!((0.0..1.0).contains(&snap.bar_phase));
            prev = pos;
        }
    }

    #[test]
    fn indices_are_monotonic_and_tick_once() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));

        let mut last_index = 0;
        let mut ticks = 0;
        // beats a tenth of a beat early, each observed right after the
        // clock crossed the boundary
        let mut next_beat = 8_000 - 800;
        for i in 1..=1_250u64 {
            let now = i * TICK;
            if now >= next_beat + 1_000 {
                let beat = BeatObservation {
                    time: at(next_beat),
                    strength: 1.0,
                    downbeat: false,
                };
                rig.publish(120.0, Some(beat));
                next_beat += 8_000;
            }
            let snap = rig.clock.tick(at(now));
            assert!(snap.beat_index >= last_index);
            if snap.beat_tick {
                assert_eq!(snap.beat_index, last_index + 1);
                ticks += 1;
            }
            last_index = snap.beat_index;
        }
        assert_eq!(ticks as u64, last_index);
        assert!((19..=21).contains(&ticks));
    }

    #[test]
    fn downbeats_align_the_bar() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));

        // every beat is observed on time, the downbeat is the second one
        let mut beat = 0u64;
        let mut next_beat = 8_000u64;
        let mut bars = 0;
        for i in 1..=6_000u64 {
            let now = i * TICK;
            if now >= next_beat + 256 {
                beat += 1;
                let observation = BeatObservation {
                    time: at(next_beat),
                    strength: 1.0,
                    downbeat: beat % 4 == 2,
                };
                rig.publish(120.0, Some(observation));
                next_beat += 8_000;
            }
            let snap = rig.clock.tick(at(now));
            if snap.bar_tick {
                assert!(snap.beat_tick);
                assert_eq!(snap.beat_in_bar, 0);
                bars += 1;
            }
            let expected_phase = (snap.beat_in_bar as f32 + snap.beat_phase) / 4.0;
            assert!((snap.bar_phase - expected_phase).abs() < 1e-5);
        }
        // 96 beats, a bar may be skipped while the offset realigns
        assert!((22..=25).contains(&bars), "{} bars", bars);

        // the bar now starts on beats 2, 6, 10, ...
        let snap = *rig.clock.snapshot();
        let expected = ((snap.beat_index as i64 - 2).rem_euclid(4)) as u8;
        assert_eq!(snap.beat_in_bar, expected);
    }

    #[test]
    fn queued_observations_are_all_applied() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));

        // two beats reported before render time reaches either of them
        let first = BeatObservation {
            time: at(8_000),
            strength: 1.0,
            downbeat: false,
        };
        let second = BeatObservation {
            time: at(8_256),
            ..first
        };
        rig.publish(120.0, Some(first));
        rig.clock.tick(at(TICK));
        rig.publish(120.0, Some(second));
        rig.clock.tick(at(2 * TICK));
        assert_eq!(rig.clock.pending_observations(), 2);

        for i in 3..=63 {
            rig.clock.tick(at(i * TICK));
        }
        assert_eq!(rig.feedback.read().last_correction, Some(first.time));
        assert_eq!(rig.clock.pending_observations(), 1);

        rig.clock.tick(at(64 * TICK));
        rig.clock.tick(at(65 * TICK));
        assert_eq!(rig.feedback.read().last_correction, Some(second.time));
        assert_eq!(rig.clock.pending_observations(), 0);
    }

    #[test]
    fn external_sync_bypasses_the_pll() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));

        rig.handle.send(ClockMessage::SetExternalSync(true)).unwrap();
        rig.handle
            .send(ClockMessage::ExternalBeat {
                bpm: 90.0,
                phase: 0.25,
                beat_in_bar: 2,
            })
            .unwrap();
        let snap = rig.clock.tick(at(TICK));
        assert!(rig.clock.is_external());
        assert_eq!(snap.bpm, 90.0);
        assert_eq!(snap.confidence, 1.0);
        assert_eq!(snap.beat_in_bar, 2);
        // 8 ms at 90 BPM past the injected phase
        assert!((snap.beat_phase - 0.262).abs() < 1e-4, "phase {}", snap.beat_phase);

        // analysis frames no longer steer the clock
        let beat = BeatObservation {
            time: at(TICK),
            strength: 1.0,
            downbeat: true,
        };
        rig.publish(150.0, Some(beat));
        rig.clock.tick(at(2 * TICK));
        assert_eq!(rig.clock.pending_observations(), 0);
        let snap = rig.clock.tick(at(RATE as u64));
        assert_eq!(snap.bpm, 90.0);
        assert_eq!(snap.confidence, 1.0);

        rig.handle.send(ClockMessage::SetExternalSync(false)).unwrap();
        rig.publish(120.0, None);
        let mut snap = rig.clock.tick(at(RATE as u64 + TICK));
        for i in 2..1_000 {
            snap = rig.clock.tick(at(RATE as u64 + i * TICK));
        }
        assert!(!rig.clock.is_external());
        assert!((snap.bpm - 120.0).abs() < 0.01);
    }

    #[test]
    fn external_beats_need_external_sync() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.handle
            .send(ClockMessage::ExternalBeat {
                bpm: 90.0,
                phase: 0.5,
                beat_in_bar: 1,
            })
            .unwrap();
        rig.clock.tick(at(0));
        let snap = rig.clock.tick(at(TICK));
        assert_eq!(snap.bpm, 120.0);
        assert!(snap.beat_phase < 0.1);
    }

    #[test]
    fn messages_apply_on_next_tick() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));
        rig.clock.tick(at(16_000));
        assert!(rig.clock.beat_position() > 1.9);

        rig.handle.send(ClockMessage::SetTimeSignature(3, 4)).unwrap();
        let snap = rig.clock.tick(at(16_000 + TICK));
        assert_eq!(snap.beats_per_bar, 3);

        rig.handle.send(ClockMessage::Reset).unwrap();
        let snap = rig.clock.tick(at(32_000));
        assert_eq!(snap.beat_index, 0);
        assert_eq!(snap.beats_per_bar, 3);
        assert_eq!(rig.clock.beat_position(), 0.0);
    }

    #[test]
    fn full_queue_hands_message_back() {
        let mut rig = rig();
        for _ in 0..MESSAGE_CAPACITY {
            rig.handle.send(ClockMessage::Reset).unwrap();
        }
        assert_eq!(
            rig.handle.send(ClockMessage::SetTimeSignature(7, 8)),
            Err(ClockMessage::SetTimeSignature(7, 8))
        );
    }

    #[test]
    fn epoch_change_resets_phase() {
        let mut rig = rig();
        rig.publish(120.0, None);
        rig.clock.tick(at(0));
        rig.clock.tick(at(40_000));
        assert!(rig.clock.beat_position() > 4.0);

        rig.frames.publish(AnalysisFrame {
            epoch: 1,
            ..AnalysisFrame::default()
        });
        let snap = rig.clock.tick(at(40_128));
        assert_eq!(rig.clock.beat_position(), 0.0);
        assert_eq!(snap.beat_index, 0);
    }

    #[test]
    fn confidence_decays_without_frames() {
        let mut rig = rig();
        rig.publish(120.0, None);
        let first = rig.clock.tick(at(0));
        assert!((first.confidence - 0.8).abs() < 1e-6);
        let later = rig.clock.tick(at(3 * RATE as u64));
        assert!(later.confidence < 0.05);
    }
}
