//! Playback mode and interval selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Interval outside the fixed set of choices
    #[error("interval of {0} minutes is not one of {allowed:?}", allowed = IntervalMinutes::ALLOWED)]
    IntervalNotAllowed(u32),
    /// Interval string was not a number
    #[error("invalid interval '{0}': expected whole minutes")]
    InvalidNumber(String),
    /// Mode string was not recognised
    #[error("unknown playback mode '{0}': expected 'continuous' or 'interval'")]
    UnknownMode(String),
}

/// How the keepalive signal is delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Stream the signal without pause.
    #[default]
    Continuous,
    /// Emit a short pulse every [`IntervalMinutes`].
    Interval,
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Continuous => write!(f, "continuous"),
            PlaybackMode::Interval => write!(f, "interval"),
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" => Ok(PlaybackMode::Continuous),
            "interval" => Ok(PlaybackMode::Interval),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

/// Minutes between pulses, restricted to the values the preferences offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct IntervalMinutes(u32);

impl IntervalMinutes {
    /// Every interval a user can pick.
    pub const ALLOWED: [u32; 6] = [5, 10, 15, 20, 25, 30];

    /// Validate `minutes` against [`Self::ALLOWED`].
    pub fn new(minutes: u32) -> Result<Self, ConfigError> {
        if Self::ALLOWED.contains(&minutes) {
            Ok(Self(minutes))
        } else {
            Err(ConfigError::IntervalNotAllowed(minutes))
        }
    }

    /// Snap an arbitrary value to the closest allowed interval.
    ///
    /// Ties resolve to the shorter interval.
    pub fn nearest(minutes: u32) -> Self {
        let best = Self::ALLOWED
            .iter()
            .copied()
            .min_by_key(|&m| m.abs_diff(minutes))
            .unwrap_or(Self::ALLOWED[0]);
        Self(best)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Timer period given the length of one minute.
    ///
    /// Production uses 60 s; tests shrink the minute to keep runs short.
    pub fn period(self, minute: Duration) -> Duration {
        minute * self.0
    }
}

impl Default for IntervalMinutes {
    fn default() -> Self {
        Self(Self::ALLOWED[0])
    }
}

impl TryFrom<u32> for IntervalMinutes {
    type Error = ConfigError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Self::new(minutes)
    }
}

impl From<IntervalMinutes> for u32 {
    fn from(interval: IntervalMinutes) -> u32 {
        interval.0
    }
}

impl FromStr for IntervalMinutes {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes: u32 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber(s.to_string()))?;
        Self::new(minutes)
    }
}

impl fmt::Display for IntervalMinutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.0)
    }
}
