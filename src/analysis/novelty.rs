//! Spectral-flux novelty and adaptive-threshold onset picking.

use crate::config::{NoveltyConfig, NUM_BANDS};
use crate::frame::{OnsetTriggers, Trigger};

/// Fixed-capacity ring of the most recent values.
#[derive(Clone, Debug)]
pub(crate) struct RollingWindow {
    values: Vec<f32>,
    pos: usize,
    len: usize,
}

impl RollingWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity.max(1)],
            pos: 0,
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, value: f32) {
        self.values[self.pos] = value;
        self.pos = (self.pos + 1) % self.values.len();
        self.len = (self.len + 1).min(self.values.len());
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.values.len()
    }

    pub(crate) fn mean_std(&self) -> (f32, f32) {
        if self.len == 0 {
            return (0.0, 0.0);
        }
        let n = self.len as f32;
        let filled = &self.values[..self.len];
        let mean = filled.iter().sum::<f32>() / n;
        let var = filled.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        (mean, var.max(0.0).sqrt())
    }

    pub(crate) fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.pos = 0;
        self.len = 0;
    }
}

/// Three-point peak picker over a rolling adaptive threshold.
///
/// A value is reported one push late, once the following value shows it was
/// a strict local maximum above `max(mean + k * std, floor)` of the window.
#[derive(Clone, Debug)]
pub struct PeakPicker {
    window: RollingWindow,
    k: f32,
    floor: f32,
    prev: f32,
    prev2: f32,
    threshold: f32,
}

impl PeakPicker {
    pub fn new(window_len: usize, k: f32, floor: f32) -> Self {
        Self {
            window: RollingWindow::new(window_len),
            k,
            floor,
            prev: 0.0,
            prev2: 0.0,
            threshold: floor,
        }
    }

    /// Feed the next value; returns the previous value if it was a peak.
    pub fn push(&mut self, value: f32) -> Option<f32> {
        self.window.push(value);

        let mut peak = None;
        if self.window.is_full() {
            let (mean, std) = self.window.mean_std();
            self.threshold = (mean + self.k * std).max(self.floor);
            let candidate = self.prev;
            if candidate > self.prev2 && candidate > value && candidate > self.threshold {
                peak = Some(candidate);
            }
        }

        self.prev2 = self.prev;
        self.prev = value;
        peak
    }

    /// Threshold applied to the most recent candidate
    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.prev = 0.0;
        self.prev2 = 0.0;
        self.threshold = self.floor;
    }
}

const KICK_BANDS: (usize, usize) = (0, 2);
const SNARE_BANDS: (usize, usize) = (2, 4);
const HIHAT_BANDS: (usize, usize) = (6, 8);

/// Result of one hop of novelty detection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoveltyOutput {
    /// Half-wave rectified spectral flux in `[0, 1]`
    pub novelty: f32,
    /// Strength of a broadband onset that peaked on the previous hop
    pub onset: Option<f32>,
    pub triggers: OnsetTriggers,
}

/// Turns per-band energies into an onset-strength scalar.
pub struct NoveltyDetector {
    config: NoveltyConfig,
    prev_bands: [f32; NUM_BANDS],
    has_prev: bool,
    onset: PeakPicker,
    kick: PeakPicker,
    snare: PeakPicker,
    hihat: PeakPicker,
}

impl NoveltyDetector {
    pub fn new(config: NoveltyConfig) -> Self {
        let picker = || {
            PeakPicker::new(
                config.window_len,
                config.threshold_k,
                config.threshold_floor,
            )
        };
        Self {
            config,
            prev_bands: [0.0; NUM_BANDS],
            has_prev: false,
            onset: picker(),
            kick: picker(),
            snare: picker(),
            hihat: picker(),
        }
    }

    /// Process one hop of band energies.
    pub fn process(&mut self, bands: &[f32; NUM_BANDS]) -> NoveltyOutput {
        let mut rise = [0.0f32; NUM_BANDS];
        if self.has_prev {
            for (r, (now, prev)) in rise.iter_mut().zip(bands.iter().zip(&self.prev_bands)) {
                *r = (now - prev).max(0.0);
            }
        }
        self.prev_bands = *bands;
        self.has_prev = true;

        let gain = self.config.flux_gain;
        let flux = |range: (usize, usize)| -> f32 {
            (rise[range.0..range.1].iter().sum::<f32>() * gain).clamp(0.0, 1.0)
        };

        let novelty = flux((0, NUM_BANDS));
        let triggers = OnsetTriggers {
            kick: Trigger::from_peak(self.kick.push(flux(KICK_BANDS))),
            snare: Trigger::from_peak(self.snare.push(flux(SNARE_BANDS))),
            hihat: Trigger::from_peak(self.hihat.push(flux(HIHAT_BANDS))),
        };

        NoveltyOutput {
            novelty,
            onset: self.onset.push(novelty),
            triggers,
        }
    }

    /// Current adaptive threshold of the broadband onset picker
    #[inline]
    pub fn threshold(&self) -> f32 {
        self.onset.threshold()
    }

    pub fn reset(&mut self) {
        self.prev_bands = [0.0; NUM_BANDS];
        self.has_prev = false;
        self.onset.reset();
        self.kick.reset();
        self.snare.reset();
        self.hihat.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> NoveltyDetector {
        NoveltyDetector::new(NoveltyConfig::default())
    }

    #[test]
    fn first_hop_has_no_flux() {
        let mut novelty = detector();
        let out = novelty.process(&[0.8; NUM_BANDS]);
        assert_eq!(out.novelty, 0.0);
        assert!(out.onset.is_none());
    }

    #[test]
    fn flux_is_rectified_and_clamped() {
        let mut novelty = detector();
        novelty.process(&[0.5; NUM_BANDS]);
        let falling = novelty.process(&[0.0; NUM_BANDS]);
        assert_eq!(falling.novelty, 0.0);
        let rising = novelty.process(&[1.0; NUM_BANDS]);
        assert_eq!(rising.novelty, 1.0);
    }

    #[test]
    fn no_onsets_before_window_fills() {
        let mut novelty = detector();
        let mut fired = 0;
        for i in 0..15 {
            let level = if i % 4 == 1 { 0.1 } else { 0.0 };
            if novelty.process(&[level; NUM_BANDS]).onset.is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 0);
    }

    #[test]
    fn isolated_click_fires_one_hop_late() {
        let mut novelty = detector();
        for _ in 0..20 {
            novelty.process(&[0.0; NUM_BANDS]);
        }
        let click = novelty.process(&[0.1; NUM_BANDS]);
        assert!(click.onset.is_none());
        assert!((click.novelty - 0.8).abs() < 1e-6);

        let after = novelty.process(&[0.05; NUM_BANDS]);
        let strength = after.onset.expect("click should be reported on the next hop");
        assert!((strength - 0.8).abs() < 1e-6);
        assert!(after.triggers.kick.fired);
        assert!(after.triggers.hihat.fired);
    }

    #[test]
    fn rising_edge_does_not_fire() {
        let mut picker = PeakPicker::new(4, 1.0, 0.05);
        for _ in 0..4 {
            assert!(picker.push(0.0).is_none());
        }
        assert!(picker.push(0.5).is_none());
        assert!(picker.push(0.9).is_none());
        assert_eq!(picker.push(0.2), Some(0.9));
    }

    #[test]
    fn silence_keeps_threshold_at_floor() {
        let mut novelty = detector();
        for _ in 0..100 {
            let out = novelty.process(&[0.0; NUM_BANDS]);
            assert!(out.onset.is_none());
        }
        assert!((novelty.threshold() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn only_high_bands_fire_hihat() {
        let mut novelty = detector();
        for _ in 0..20 {
            novelty.process(&[0.0; NUM_BANDS]);
        }
        let mut bands = [0.0; NUM_BANDS];
        bands[6] = 0.5;
        bands[7] = 0.5;
        novelty.process(&bands);
        let out = novelty.process(&[0.0; NUM_BANDS]);
        assert!(out.triggers.hihat.fired);
        assert!(!out.triggers.kick.fired);
        assert!(!out.triggers.snare.fired);
    }
}
