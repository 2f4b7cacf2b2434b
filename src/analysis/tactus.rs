//! Beat-level tempo selection and the lock state machine.

use tracing::{debug, info};

use crate::analysis::resonator::CandidateSet;
use crate::config::{StateThresholds, TactusConfig};

/// How much the tracker trusts its tempo.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackerState {
    #[default]
    Lost,
    Coast,
    Locked,
}

impl TrackerState {
    /// State after observing `confidence`.
    ///
    /// Every transition needs its own threshold to be crossed, so values
    /// between an on and off threshold never change the state.
    pub fn next(self, confidence: f32, thresholds: &StateThresholds) -> TrackerState {
        match self {
            TrackerState::Lost if confidence > thresholds.lost_to_coast => TrackerState::Coast,
            TrackerState::Coast if confidence > thresholds.coast_to_locked => TrackerState::Locked,
            TrackerState::Coast if confidence < thresholds.coast_to_lost => TrackerState::Lost,
            TrackerState::Locked if confidence < thresholds.locked_to_coast => TrackerState::Coast,
            state => state,
        }
    }

    #[inline]
    pub fn is_locked(self) -> bool {
        self == TrackerState::Locked
    }
}

/// Outcome of one tactus cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TactusDecision {
    /// Current incumbent tempo, unsmoothed
    pub incumbent_bpm: Option<f32>,
    pub incumbent_score: f32,
    /// How far the incumbent family stands above unrelated candidates, `[0, 1]`
    pub dominance: f32,
    /// The incumbent was replaced by a challenger this cycle
    pub switched: bool,
}

/// Picks one beat-level tempo from the candidates of each cycle.
pub struct TactusResolver {
    config: TactusConfig,
    state: TrackerState,
    incumbent: Option<f32>,
    challenger: Option<f32>,
    streak: u32,
    switches: u32,
    smoothed_bpm: Option<f32>,
}

impl TactusResolver {
    pub fn new(config: TactusConfig) -> Self {
        Self {
            config,
            state: TrackerState::Lost,
            incumbent: None,
            challenger: None,
            streak: 0,
            switches: 0,
            smoothed_bpm: None,
        }
    }

    /// Octave-family score of `bpm` weighted by the perceptual prior.
    ///
    /// An overtone of a stronger fundamental scores zero: a pulse train at
    /// `b` rings the `2b` and `3b` resonators about as hard as `b` itself,
    /// while a train at `2b` leaves `b` silent.
    pub fn family_score(&self, candidates: &CandidateSet, bpm: f32) -> f32 {
        if self.is_overtone(candidates, bpm) {
            return 0.0;
        }
        let c = &self.config;
        let tol = c.family_tolerance_bpm;
        let own = candidates.magnitude_near(bpm, tol);
        // a relative never lends more than the candidate carries itself
        let relative = |at: f32| c.family_weight * candidates.magnitude_near(at, tol).min(own);
        let family = own + relative(bpm / 2.0) + relative(bpm * 2.0);
        let z = (bpm - c.prior_center_bpm) / c.prior_sigma_bpm;
        family * (-0.5 * z * z).exp()
    }

    /// True when `b/2` or `b/3` carries at least `harmonic_ratio` of the
    /// magnitude at `bpm`.
    pub fn is_overtone(&self, candidates: &CandidateSet, bpm: f32) -> bool {
        let tol = self.config.family_tolerance_bpm;
        let own = candidates.magnitude_near(bpm, tol);
        own > 0.0
            && [2.0, 3.0].iter().any(|&n| {
                candidates.magnitude_near(bpm / n, tol) >= self.config.harmonic_ratio * own
            })
    }

    /// Arbitrate between incumbent and challenger for one cycle.
    pub fn update(&mut self, candidates: &CandidateSet) -> TactusDecision {
        let best = candidates
            .iter()
            .map(|c| (c.bpm, self.family_score(candidates, c.bpm)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((best_bpm, _)) = best else {
            self.reset_challenger();
            return TactusDecision {
                incumbent_bpm: self.incumbent,
                ..TactusDecision::default()
            };
        };

        let tol = self.config.family_tolerance_bpm;
        let mut switched = false;

        match self.incumbent {
            Some(incumbent) if self.state != TrackerState::Lost => {
                let incumbent = candidates
                    .nearest(incumbent, tol)
                    .map_or(incumbent, |c| c.bpm);
                self.incumbent = Some(incumbent);
                let incumbent_score = self.family_score(candidates, incumbent);

                let challenger = candidates
                    .iter()
                    .filter(|c| (c.bpm - incumbent).abs() > tol)
                    .map(|c| (c.bpm, self.family_score(candidates, c.bpm)))
                    .max_by(|a, b| a.1.total_cmp(&b.1));

                match challenger {
                    Some((bpm, score)) if score > self.config.switch_ratio * incumbent_score => {
                        let same = self
                            .challenger
                            .is_some_and(|prev| (prev - bpm).abs() <= self.config.challenger_tolerance_bpm);
                        self.streak = if same { self.streak + 1 } else { 1 };
                        self.challenger = Some(bpm);

                        if self.streak >= self.config.switch_cycles {
                            debug!(
                                from = incumbent,
                                to = bpm,
                                ratio = score / incumbent_score.max(f32::MIN_POSITIVE),
                                "tempo switch"
                            );
                            self.incumbent = Some(bpm);
                            // a confirmed switch restarts smoothing at the new tempo
                            self.smoothed_bpm = Some(bpm);
                            self.switches += 1;
                            self.reset_challenger();
                            switched = true;
                        }
                    }
                    _ => self.reset_challenger(),
                }
            }
            _ => {
                self.incumbent = Some(best_bpm);
                self.reset_challenger();
            }
        }

        let incumbent = self.incumbent.unwrap_or(best_bpm);
        let incumbent_score = self.family_score(candidates, incumbent);
        TactusDecision {
            incumbent_bpm: Some(incumbent),
            incumbent_score,
            dominance: self.dominance(candidates, incumbent, incumbent_score),
            switched,
        }
    }

    /// Advance the state machine and the smoothed tempo.
    ///
    /// This is the only place the tracker state changes. Returns the previous
    /// state when a transition happened.
    pub fn apply_confidence(&mut self, confidence: f32) -> Option<TrackerState> {
        let previous = self.state;
        self.state = previous.next(confidence, &self.config.thresholds);
        if self.state != previous {
            info!(from = ?previous, to = ?self.state, confidence, "tracker state");
        }

        if let Some(target) = self.incumbent {
            self.smoothed_bpm = Some(match self.smoothed_bpm {
                Some(bpm) => {
                    let settled = (target - bpm).abs() <= self.config.catch_up_bpm;
                    let blend = if self.state.is_locked() && settled {
                        self.config.locked_blend
                    } else {
                        self.config.unlocked_blend
                    };
                    bpm + blend * (target - bpm)
                }
                None => target,
            });
        }

        (self.state != previous).then_some(previous)
    }

    #[inline]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    #[inline]
    pub fn incumbent(&self) -> Option<f32> {
        self.incumbent
    }

    /// Smoothed tempo, once an incumbent has been chosen
    #[inline]
    pub fn smoothed_bpm(&self) -> Option<f32> {
        self.smoothed_bpm
    }

    /// Number of confirmed tempo switches since construction or reset
    #[inline]
    pub fn switch_count(&self) -> u32 {
        self.switches
    }

    /// Consecutive cycles the current challenger has held its advantage
    #[inline]
    pub fn challenger_streak(&self) -> u32 {
        self.streak
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn reset_challenger(&mut self) {
        self.challenger = None;
        self.streak = 0;
    }

    fn dominance(&self, candidates: &CandidateSet, incumbent: f32, incumbent_score: f32) -> f32 {
        if incumbent_score <= 0.0 {
            return 0.0;
        }
        let tol = self.config.family_tolerance_bpm;
        let related = |bpm: f32| {
            [incumbent, incumbent / 2.0, incumbent * 2.0]
                .iter()
                .any(|r| (bpm - r).abs() <= tol)
        };
        let rival = candidates
            .iter()
            .filter(|c| !related(c.bpm))
            .map(|c| self.family_score(candidates, c.bpm))
            .fold(0.0f32, f32::max);
        ((incumbent_score - rival) / incumbent_score).clamp(0.0, 1.0)
    }
}
