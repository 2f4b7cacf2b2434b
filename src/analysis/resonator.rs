//! Bank of single-frequency resonators over the novelty stream.
//!
//! Each resonator is a leaky Goertzel-style accumulator tuned to one beat
//! rate. A click train drives every resonator whose period divides the click
//! period, while rates that see alternating phases cancel out. Integrating
//! over many beats means a regular subdivision only wins if it really carries
//! more periodic energy than the beat.

use std::f32::consts::TAU;

use crate::config::{ResonatorConfig, MAX_CANDIDATES};

/// One tempo hypothesis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TempoCandidate {
    /// Interpolated tempo, not quantized to the resonator grid
    pub bpm: f32,
    /// Periodic energy, zero for padding entries
    pub magnitude: f32,
    /// Current position within the hypothesized beat, in `[0, 1)`
    pub phase: f32,
}

impl TempoCandidate {
    pub const NULL: TempoCandidate = TempoCandidate {
        bpm: 0.0,
        magnitude: 0.0,
        phase: 0.0,
    };

    #[inline]
    pub fn is_null(&self) -> bool {
        self.magnitude <= 0.0
    }
}

/// Candidates of one analysis cycle, strongest first.
///
/// Always holds [`MAX_CANDIDATES`] entries; unused ones are
/// [`TempoCandidate::NULL`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateSet {
    candidates: [TempoCandidate; MAX_CANDIDATES],
    len: usize,
}

impl Default for CandidateSet {
    fn default() -> Self {
        Self {
            candidates: [TempoCandidate::NULL; MAX_CANDIDATES],
            len: 0,
        }
    }
}

impl CandidateSet {
    /// Build a set from arbitrary candidates, keeping the strongest `top_k`.
    pub fn from_candidates(candidates: &[TempoCandidate], top_k: usize) -> Self {
        let mut set = Self::default();
        for c in candidates {
            set.insert(*c, top_k);
        }
        set
    }

    fn insert(&mut self, candidate: TempoCandidate, top_k: usize) {
        let limit = top_k.min(MAX_CANDIDATES);
        if candidate.is_null() || limit == 0 {
            return;
        }
        let pos = self.candidates[..self.len]
            .iter()
            .position(|c| candidate.magnitude > c.magnitude)
            .unwrap_or(self.len);
        if pos >= limit {
            return;
        }
        let end = (self.len + 1).min(limit);
        for i in (pos + 1..end).rev() {
            self.candidates[i] = self.candidates[i - 1];
        }
        self.candidates[pos] = candidate;
        self.len = end;
    }

    /// Non-null candidates, strongest first
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &TempoCandidate> {
        self.candidates[..self.len].iter()
    }

    /// All slots including padding
    #[inline]
    pub fn as_slice(&self) -> &[TempoCandidate; MAX_CANDIDATES] {
        &self.candidates
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn best(&self) -> Option<&TempoCandidate> {
        self.iter().next()
    }

    /// Candidate closest to `bpm`, if one lies within `tolerance`
    pub fn nearest(&self, bpm: f32, tolerance: f32) -> Option<&TempoCandidate> {
        self.iter()
            .filter(|c| (c.bpm - bpm).abs() <= tolerance)
            .min_by(|a, b| (a.bpm - bpm).abs().total_cmp(&(b.bpm - bpm).abs()))
    }

    /// Magnitude of the nearest candidate within `tolerance`, or zero
    #[inline]
    pub fn magnitude_near(&self, bpm: f32, tolerance: f32) -> f32 {
        self.nearest(bpm, tolerance).map_or(0.0, |c| c.magnitude)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Resonator {
    theta: f32,
    re: f32,
    im: f32,
}

/// Periodicity detectors spanning the configured BPM range.
pub struct TempoResonatorBank {
    config: ResonatorConfig,
    resonators: Vec<Resonator>,
    omegas: Vec<f32>,
    magnitudes: Vec<f32>,
    decay: f32,
    norm: f32,
    dc: f32,
    dc_alpha: f32,
}

impl TempoResonatorBank {
    pub fn new(config: ResonatorConfig, hop_secs: f32) -> Self {
        let n = config.num_resonators();
        let omegas = (0..n)
            .map(|i| {
                let bpm = config.min_bpm + i as f32 * config.bpm_step;
                TAU * bpm / 60.0 * hop_secs
            })
            .collect();
        let decay = (-hop_secs / config.window_secs).exp();
        Self {
            config,
            resonators: vec![Resonator::default(); n],
            omegas,
            magnitudes: vec![0.0; n],
            decay,
            norm: 1.0 - decay,
            dc: 0.0,
            dc_alpha: 1.0 - (-hop_secs / config.dc_secs).exp(),
        }
    }

    /// Accumulate one novelty value into every resonator.
    pub fn process(&mut self, novelty: f32) {
        self.dc += self.dc_alpha * (novelty - self.dc);
        let x = novelty - self.dc;
        let decay = self.decay;

        for ((r, &omega), mag) in self
            .resonators
            .iter_mut()
            .zip(&self.omegas)
            .zip(self.magnitudes.iter_mut())
        {
            r.theta += omega;
            if r.theta >= TAU {
                r.theta -= TAU;
            }
            let (sin, cos) = r.theta.sin_cos();
            r.re = decay * r.re + x * cos;
            r.im = decay * r.im - x * sin;
            *mag = (r.re * r.re + r.im * r.im).sqrt() * self.norm;
        }
    }

    /// Local maxima of the magnitude curve, interpolated and ranked.
    pub fn candidates(&self) -> CandidateSet {
        let mut set = CandidateSet::default();
        let m = &self.magnitudes;
        let n = m.len();

        for i in 0..n {
            let left = if i > 0 { m[i - 1] } else { f32::NEG_INFINITY };
            let right = if i + 1 < n { m[i + 1] } else { f32::NEG_INFINITY };
            if !(m[i] >= left && m[i] > right) || m[i] < self.config.min_magnitude {
                continue;
            }

            let (offset, magnitude) = if i > 0 && i + 1 < n {
                parabolic_peak(m[i - 1], m[i], m[i + 1])
            } else {
                (0.0, m[i])
            };

            set.insert(
                TempoCandidate {
                    bpm: self.bpm_of(i) + offset * self.config.bpm_step,
                    magnitude,
                    phase: self.phase_of(i),
                },
                self.config.top_k,
            );
        }
        set
    }

    /// Beat phase of the resonator nearest to `bpm`, in `[0, 1)`
    pub fn beat_phase_at(&self, bpm: f32) -> f32 {
        self.phase_of(self.index_of(bpm))
    }

    /// Magnitude of every resonator, slowest first
    #[inline]
    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    #[inline]
    pub fn bpm_of(&self, index: usize) -> f32 {
        self.config.min_bpm + index as f32 * self.config.bpm_step
    }

    pub fn reset(&mut self) {
        self.resonators.iter_mut().for_each(|r| *r = Resonator::default());
        self.magnitudes.iter_mut().for_each(|m| *m = 0.0);
        self.dc = 0.0;
    }

    fn index_of(&self, bpm: f32) -> usize {
        let i = ((bpm - self.config.min_bpm) / self.config.bpm_step).round();
        (i.max(0.0) as usize).min(self.resonators.len() - 1)
    }

    fn phase_of(&self, index: usize) -> f32 {
        let r = &self.resonators[index];
        let turns = (r.theta + r.im.atan2(r.re)) / TAU;
        let phase = turns - turns.floor();
        // rounding can land exactly on 1.0
        if phase >= 1.0 {
            0.0
        } else {
            phase
        }
    }
}

/// Vertex of the parabola through three equally spaced points.
///
/// Returns the offset from the middle point in bins and the interpolated
/// height.
fn parabolic_peak(left: f32, centre: f32, right: f32) -> (f32, f32) {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f32::EPSILON {
        return (0.0, centre);
    }
    let offset = (0.5 * (left - right) / denom).clamp(-0.5, 0.5);
    (offset, centre - 0.25 * (left - right) * offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP_SECS: f32 = 0.016;

    fn drive(bank: &mut TempoResonatorBank, bpm: f32, secs: f32) {
        let period = 60.0 / bpm / HOP_SECS;
        let hops = (secs / HOP_SECS) as usize;
        let mut next = 0.0f32;
        for hop in 0..hops {
            let x = if hop as f32 >= next {
                next += period;
                0.8
            } else {
                0.0
            };
            bank.process(x);
        }
    }

    #[test]
    fn strongest_candidate_matches_click_rate() {
        let mut bank = TempoResonatorBank::new(ResonatorConfig::default(), HOP_SECS);
        drive(&mut bank, 100.0, 20.0);
        let set = bank.candidates();
        let best = set.best().expect("a click train must produce candidates");
        assert!((best.bpm - 100.0).abs() < 1.0, "best at {}", best.bpm);
    }

    #[test]
    fn half_tempo_cancels() {
        let mut bank = TempoResonatorBank::new(ResonatorConfig::default(), HOP_SECS);
        drive(&mut bank, 130.0, 20.0);
        let m = bank.magnitudes();
        let at = |bpm: f32| m[(bpm - 60.0) as usize];
        assert!(at(65.0) < 0.2 * at(130.0));
    }

    #[test]
    fn phase_is_zero_on_the_click() {
        let mut bank = TempoResonatorBank::new(ResonatorConfig::default(), HOP_SECS);
        // 125 BPM is exactly 30 hops per beat
        for hop in 0..1500 {
            bank.process(if hop % 30 == 0 { 0.8 } else { 0.0 });
        }
        // the last click landed on hop 1470, 29 hops ago
        let phase = bank.beat_phase_at(125.0);
        let expected = 29.0 / 30.0;
        assert!((phase - expected).abs() < 0.02, "phase {}", phase);
    }

    #[test]
    fn silence_pads_with_null() {
        let bank = TempoResonatorBank::new(ResonatorConfig::default(), HOP_SECS);
        let set = bank.candidates();
        assert!(set.is_empty());
        assert!(set.as_slice().iter().all(TempoCandidate::is_null));
        assert!(bank.beat_phase_at(120.0) < 1.0);
    }

    #[test]
    fn candidate_set_keeps_top_k_sorted() {
        let raw: Vec<TempoCandidate> = (0..20)
            .map(|i| TempoCandidate {
                bpm: 60.0 + i as f32 * 5.0,
                magnitude: ((i * 7) % 20) as f32 + 1.0,
                phase: 0.0,
            })
            .collect();
        let set = CandidateSet::from_candidates(&raw, 5);
        assert_eq!(set.len(), 5);
        let mags: Vec<f32> = set.iter().map(|c| c.magnitude).collect();
        assert_eq!(mags, vec![20.0, 19.0, 18.0, 17.0, 16.0]);
        assert!(set.as_slice()[5..].iter().all(TempoCandidate::is_null));
    }

    #[test]
    fn nearest_respects_tolerance() {
        let set = CandidateSet::from_candidates(
            &[
                TempoCandidate { bpm: 118.0, magnitude: 1.0, phase: 0.0 },
                TempoCandidate { bpm: 121.5, magnitude: 0.5, phase: 0.0 },
            ],
            MAX_CANDIDATES,
        );
        assert_eq!(set.nearest(120.0, 4.0).map(|c| c.bpm), Some(121.5));
        assert_eq!(set.magnitude_near(90.0, 4.0), 0.0);
    }

    #[test]
    fn parabola_vertex() {
        let (offset, height) = parabolic_peak(1.0, 2.0, 1.0);
        assert_eq!(offset, 0.0);
        assert_eq!(height, 2.0);
        let (offset, _) = parabolic_peak(1.0, 2.0, 1.5);
        assert!(offset > 0.0 && offset < 0.5);
    }
}
