//! Configuration key access and validation.
//!
//! This module provides a type-safe interface for getting and setting
//! configuration values by key name, so hosts can plug the store behind a
//! string-keyed persistence layer without losing validation.

use std::str::FromStr;

use thiserror::Error;

use super::settings::{wake_interval_in_bounds, Settings};

/// Errors that can occur when getting or setting configuration values.
#[derive(Debug, Error)]
pub enum ConfigKeyError {
    /// Unknown configuration key.
    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    /// Validation failed for the value; the previous value is retained.
    #[error("Invalid value for {key}: {reason}")]
    ValidationFailed { key: String, reason: String },
}

/// Supported configuration keys.
///
/// Each key maps to one field of [`Settings`] and knows how to get and set
/// its value with proper validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// Collector URL (`server_url`). Empty disables uploads.
    ServerUrl,
    /// User identifier (`user_name`).
    UserName,
    /// Master upload switch (`upload_enabled`).
    UploadEnabled,
    /// Foreground upload interval in milliseconds.
    ForegroundIntervalMs,
    /// Background upload interval in milliseconds.
    BackgroundIntervalMs,
    /// Wake-cycle period in milliseconds, bounded to [1 min, 30 min].
    WakeIntervalMs,
}

impl ConfigKey {
    /// All keys, for enumeration by settings UIs.
    pub const ALL: [ConfigKey; 6] = [
        ConfigKey::ServerUrl,
        ConfigKey::UserName,
        ConfigKey::UploadEnabled,
        ConfigKey::ForegroundIntervalMs,
        ConfigKey::BackgroundIntervalMs,
        ConfigKey::WakeIntervalMs,
    ];

    /// The string name used by persistence layers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerUrl => "server_url",
            Self::UserName => "user_name",
            Self::UploadEnabled => "upload_enabled",
            Self::ForegroundIntervalMs => "foreground_interval_ms",
            Self::BackgroundIntervalMs => "background_interval_ms",
            Self::WakeIntervalMs => "wake_interval_ms",
        }
    }

    /// Read this key's current value as a string.
    pub fn get(&self, settings: &Settings) -> String {
        match self {
            Self::ServerUrl => settings.server_url.clone(),
            Self::UserName => settings.user_name.clone(),
            Self::UploadEnabled => settings.upload_enabled.to_string(),
            Self::ForegroundIntervalMs => settings.foreground_interval_ms.to_string(),
            Self::BackgroundIntervalMs => settings.background_interval_ms.to_string(),
            Self::WakeIntervalMs => settings.wake_interval_ms.to_string(),
        }
    }

    /// Parse, validate and apply a value to `settings`.
    ///
    /// On validation failure the settings are left untouched and the
    /// previous value remains in effect.
    pub fn set(&self, settings: &mut Settings, value: &str) -> Result<(), ConfigKeyError> {
        match self {
            Self::ServerUrl => {
                settings.server_url = value.to_string();
                Ok(())
            }
            Self::UserName => {
                settings.user_name = value.to_string();
                Ok(())
            }
            Self::UploadEnabled => {
                settings.upload_enabled = parse_value(self, value)?;
                Ok(())
            }
            Self::ForegroundIntervalMs => {
                settings.foreground_interval_ms = parse_positive_ms(self, value)?;
                Ok(())
            }
            Self::BackgroundIntervalMs => {
                settings.background_interval_ms = parse_positive_ms(self, value)?;
                Ok(())
            }
            Self::WakeIntervalMs => {
                let ms = parse_value(self, value)?;
                if !wake_interval_in_bounds(ms) {
                    return Err(ConfigKeyError::ValidationFailed {
                        key: self.name().to_string(),
                        reason: format!("{} is outside [60000, 1800000]", ms),
                    });
                }
                settings.wake_interval_ms = ms;
                Ok(())
            }
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .iter()
            .find(|key| key.name() == s)
            .copied()
            .ok_or_else(|| ConfigKeyError::UnknownKey(s.to_string()))
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn parse_value<T: FromStr>(key: &ConfigKey, value: &str) -> Result<T, ConfigKeyError> {
    value
        .parse()
        .map_err(|_| ConfigKeyError::ValidationFailed {
            key: key.name().to_string(),
            reason: format!("cannot parse '{}'", value),
        })
}

fn parse_positive_ms(key: &ConfigKey, value: &str) -> Result<i64, ConfigKeyError> {
    let ms: i64 = parse_value(key, value)?;
    if ms <= 0 {
        return Err(ConfigKeyError::ValidationFailed {
            key: key.name().to_string(),
            reason: format!("{} is not a positive interval", ms),
        });
    }
    Ok(ms)
}
