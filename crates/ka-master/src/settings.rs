//! User settings and their on-disk store.
//!
//! The controller never reads the store itself; the shell loads a
//! [`Settings`] value and hands it over at construction and on every
//! `apply_settings` call.

use crate::error::Result;
use ka_core::{IntervalMinutes, PlaybackMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from reading or writing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not encode settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no configuration directory on this platform")]
    NoConfigDir,
}

/// Mode and interval chosen in the preferences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub mode: PlaybackMode,
    pub interval_minutes: IntervalMinutes,
}

impl Settings {
    /// Same settings with a new interval, validated against the allowed set.
    pub fn with_interval_minutes(self, minutes: u32) -> Result<Settings> {
        Ok(Settings {
            interval_minutes: IntervalMinutes::new(minutes)?,
            ..self
        })
    }
}

/// File contents before validation. Missing keys fall back to defaults and
/// stray intervals get snapped instead of rejecting the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredSettings {
    mode: Option<PlaybackMode>,
    interval_minutes: Option<u32>,
}

impl From<StoredSettings> for Settings {
    fn from(stored: StoredSettings) -> Self {
        let interval_minutes = match stored.interval_minutes {
            None => IntervalMinutes::default(),
            Some(raw) => IntervalMinutes::new(raw).unwrap_or_else(|_| {
                let snapped = IntervalMinutes::nearest(raw);
                warn!(
                    stored = raw,
                    using = snapped.get(),
                    "interval not in the allowed set, snapping"
                );
                snapped
            }),
        };
        Settings {
            mode: stored.mode.unwrap_or_default(),
            interval_minutes,
        }
    }
}

/// TOML-backed settings persistence.
#[derive(Clone, Debug)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/audio-keepalive/settings.toml`.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(dir.join("audio-keepalive").join("settings.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the settings, or defaults when nothing has been saved yet.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        Ok(self.read()?)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        self.write(settings)?;
        info!(path = %self.path.display(), mode = %settings.mode, interval = settings.interval_minutes.get(), "settings saved");
        Ok(())
    }

    /// Overwrite the file with defaults and return them.
    pub fn reset(&self) -> Result<Settings> {
        let defaults = Settings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }

    fn read(&self) -> std::result::Result<Settings, SettingsError> {
        let text = fs::read_to_string(&self.path)?;
        let stored: StoredSettings = toml::from_str(&text)?;
        Ok(stored.into())
    }

    fn write(&self, settings: &Settings) -> std::result::Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string(settings)?)?;
        Ok(())
    }
}
