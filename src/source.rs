//! Hop sources standing in for the band energy provider.

use crate::config::NUM_BANDS;
use crate::frame::AudioHop;
use crate::time::AudioTime;

/// Anything that can deliver calibrated band energies one hop at a time.
pub trait HopSource {
    fn next_hop(&mut self) -> AudioHop;
}

// per-hop decay of a click's band energy
const CLICK_RELEASE: f32 = 0.5;

/// Synthetic click track.
///
/// Every beat raises all bands to `level` on the hop containing it, then the
/// energy releases over the following hops. An optional subdivision click
/// halfway between beats and an optional accent on the first beat of each
/// bar make the track harder to follow.
pub struct ClickTrack {
    bpm: f32,
    hop_size: usize,
    level: f32,
    subdivision_level: f32,
    accent: Option<(u32, f32)>,
    time: AudioTime,
    next_event: f64,
    event_count: u64,
    bands: [f32; NUM_BANDS],
}

impl ClickTrack {
    pub fn new(bpm: f32, sample_rate: u32, hop_size: usize) -> Self {
        Self {
            bpm,
            hop_size,
            level: 0.1,
            subdivision_level: 0.0,
            accent: None,
            time: AudioTime::new(0, sample_rate),
            next_event: 0.0,
            event_count: 0,
            bands: [0.0; NUM_BANDS],
        }
    }

    /// Band energy of a beat click
    pub fn with_level(mut self, level: f32) -> Self {
        self.level = level.clamp(0.0, 1.0);
        self
    }

    /// Band energy of the click halfway between two beats (0 disables it)
    pub fn with_subdivision(mut self, level: f32) -> Self {
        self.subdivision_level = level.clamp(0.0, 1.0);
        self
    }

    /// Multiply the first beat of every `beats_per_bar` beats by `gain`
    pub fn with_accent(mut self, beats_per_bar: u32, gain: f32) -> Self {
        self.accent = Some((beats_per_bar.max(1), gain));
        self
    }

    /// Delay the first beat by `samples`
    pub fn with_offset(mut self, samples: u64) -> Self {
        self.next_event = samples as f64;
        self
    }

    /// Start the hop timeline at `time` instead of sample zero
    pub fn starting_at(mut self, time: AudioTime) -> Self {
        self.next_event += time.sample_index as f64;
        self.time = time;
        self
    }

    #[inline]
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Samples between two beats
    #[inline]
    pub fn beat_period(&self) -> f64 {
        self.time.sample_rate as f64 * 60.0 / self.bpm as f64
    }

    fn event_level(&self) -> f32 {
        let events_per_beat = if self.subdivision_level > 0.0 { 2 } else { 1 };
        if self.event_count % events_per_beat != 0 {
            return self.subdivision_level;
        }
        let beat = self.event_count / events_per_beat;
        match self.accent {
            Some((beats_per_bar, gain)) if beat % beats_per_bar as u64 == 0 => {
                (self.level * gain).min(1.0)
            }
            _ => self.level,
        }
    }
}

impl HopSource for ClickTrack {
    fn next_hop(&mut self) -> AudioHop {
        for band in self.bands.iter_mut() {
            *band *= CLICK_RELEASE;
        }

        let hop_end = (self.time.sample_index + self.hop_size as u64) as f64;
        let step = if self.subdivision_level > 0.0 {
            self.beat_period() / 2.0
        } else {
            self.beat_period()
        };

        while self.next_event < hop_end {
            let level = self.event_level();
            for band in self.bands.iter_mut() {
                *band = band.max(level);
            }
            self.event_count += 1;
            self.next_event += step;
        }

        let hop = AudioHop::new(self.time, self.bands);
        self.time = self.time.advanced(self.hop_size as u64);
        hop
    }
}

/// All-zero input, as fed when capture has nothing to deliver.
pub struct Silence {
    hop_size: usize,
    time: AudioTime,
}

impl Silence {
    pub fn new(sample_rate: u32, hop_size: usize) -> Self {
        Self {
            hop_size,
            time: AudioTime::new(0, sample_rate),
        }
    }

    pub fn starting_at(mut self, time: AudioTime) -> Self {
        self.time = time;
        self
    }
}

impl HopSource for Silence {
    fn next_hop(&mut self) -> AudioHop {
        let hop = AudioHop::silent(self.time);
        self.time = self.time.advanced(self.hop_size as u64);
        hop
    }
}
