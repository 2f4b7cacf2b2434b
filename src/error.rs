//! Error types for pipeline construction.
//!
//! Per-hop and per-tick operations never fail; only configuration can be
//! rejected, and only when the pipeline is built.

use std::fmt;

/// Errors reported by [`PipelineConfig::validate`](crate::PipelineConfig::validate)
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The resonator BPM range is empty, inverted or non-positive
    InvalidBpmRange { min_bpm: f32, max_bpm: f32 },

    /// An on/off threshold pair does not leave the minimum hysteresis gap
    InvalidHysteresis { on: f32, off: f32 },

    /// Any other out-of-range parameter
    InvalidParameter(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBpmRange { min_bpm, max_bpm } => {
                write!(f, "Invalid BPM range: [{:.1}, {:.1}]", min_bpm, max_bpm)
            }
            ConfigError::InvalidHysteresis { on, off } => write!(
                f,
                "Hysteresis gap too small: on threshold {:.3}, off threshold {:.3}",
                on, off
            ),
            ConfigError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
