//! Error types for the controller layer.

use ka_audio::AudioError;
use ka_core::ConfigError;
use thiserror::Error;

use crate::settings::SettingsError;

/// Everything the controller can report. None of these are fatal: the
/// controller stays stopped/idle and a later start or apply retries.
#[derive(Debug, Error)]
pub enum Error {
    /// Output device could not be opened or primed
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(#[from] AudioError),

    /// Mode or interval outside what the preferences allow
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(#[from] ConfigError),

    /// Settings file could not be read or written
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

pub type Result<T> = std::result::Result<T, Error>;
