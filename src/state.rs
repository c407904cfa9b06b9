//! Persisted dedup markers and user preferences.
//!
//! Preference reads merge the read-only system-wide file with the per-user
//! file (user values win key by key). Last-alert markers live in the user
//! file alone, so a cleared marker stays cleared. Writes only ever touch the
//! user file and are durable before they return.

use crate::settings_file::{PreferenceValues, SettingsFile, SettingsFileError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const APP_NAME: &str = "alertwatch";

const DEFAULT_SYSTEM_SETTINGS: &str = "/etc/alertwatch.conf";
const DEFAULT_GPGV: &str = "/usr/bin/gpgv";
const DEFAULT_KEYRING: &str = "/usr/share/alertwatch/keyring.gpg";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("System settings {path}: {source}")]
    System {
        path: PathBuf,
        source: SettingsFileError,
    },
    #[error("User settings {path}: {source}")]
    User {
        path: PathBuf,
        source: SettingsFileError,
    },
}

/// An independently versioned notification stream.
///
/// The empty id is the implicit default channel of single-channel
/// deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(String);

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Channel(id.into())
    }

    pub fn default_channel() -> Self {
        Channel(String::new())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Remote and cached file name of the bulletin.
    pub fn file_name(&self) -> String {
        format!("alert{}", self.0)
    }

    /// Remote and cached file name of the detached signature.
    pub fn signature_file_name(&self) -> String {
        format!("{}.sig", self.file_name())
    }

    /// Key under which the channel's marker is stored.
    pub fn key(&self) -> &str {
        if self.0.is_empty() { "default" } else { &self.0 }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reads `DISTRIB_RELEASE` from an lsb-release style file.
pub fn release_channel(lsb_release: &Path) -> Option<Channel> {
    let content = std::fs::read_to_string(lsb_release).ok()?;
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("DISTRIB_RELEASE=")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| Channel::new(value))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckInterval {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl CheckInterval {
    pub fn period(self) -> Duration {
        match self {
            CheckInterval::Hourly => Duration::from_secs(60 * 60),
            CheckInterval::Daily => Duration::from_secs(24 * 60 * 60),
            CheckInterval::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown update interval '{0}' (expected Hourly, Daily or Weekly)")]
pub struct ParseIntervalError(String);

impl FromStr for CheckInterval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(CheckInterval::Hourly),
            "daily" => Ok(CheckInterval::Daily),
            "weekly" => Ok(CheckInterval::Weekly),
            _ => Err(ParseIntervalError(s.to_string())),
        }
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckInterval::Hourly => "Hourly",
            CheckInterval::Daily => "Daily",
            CheckInterval::Weekly => "Weekly",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Preferences {
    pub server: String,
    pub interval: CheckInterval,
    pub auto_startup: bool,
    /// Channel ids; empty means "derive from the installed release".
    pub channels: Vec<String>,
}

impl Preferences {
    fn from_values(values: &PreferenceValues) -> Self {
        let defaults = Preferences::default();
        let interval = match values.update_interval.as_deref() {
            None => defaults.interval,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{e}; using {}", defaults.interval);
                defaults.interval
            }),
        };

        Preferences {
            server: values.server.clone().unwrap_or(defaults.server),
            interval,
            auto_startup: values.auto_startup.unwrap_or(defaults.auto_startup),
            channels: values.channels.clone().unwrap_or(defaults.channels),
        }
    }

    fn to_values(&self) -> PreferenceValues {
        PreferenceValues {
            server: Some(self.server.clone()),
            update_interval: Some(self.interval.to_string()),
            auto_startup: Some(self.auto_startup),
            channels: Some(self.channels.clone()),
        }
    }

    /// Channels to check, falling back to the release-derived channel.
    pub fn resolved_channels(&self, lsb_release: &Path) -> Vec<Channel> {
        if self.channels.is_empty() {
            vec![release_channel(lsb_release).unwrap_or_else(Channel::default_channel)]
        } else {
            self.channels.iter().map(Channel::new).collect()
        }
    }
}

/// Signature checker location, taken from the system file only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub gpgv: PathBuf,
    pub keyring: PathBuf,
}

pub trait StateStore {
    fn last_seen(&self, channel: &Channel) -> Result<Option<DateTime<Utc>>, StateError>;
    fn set_last_seen(&self, channel: &Channel, at: DateTime<Utc>) -> Result<(), StateError>;
    fn clear_last_seen(&self, channel: &Channel) -> Result<(), StateError>;
    fn preferences(&self) -> Result<Preferences, StateError>;
    fn set_preferences(&self, preferences: &Preferences) -> Result<(), StateError>;
}

/// [`StateStore`] over a system-wide TOML file and a per-user TOML file.
pub struct FileStateStore {
    system_path: PathBuf,
    user_path: PathBuf,
}

impl FileStateStore {
    pub fn new(system_path: PathBuf, user_path: PathBuf) -> Self {
        FileStateStore {
            system_path,
            user_path,
        }
    }

    pub fn default_system_path() -> PathBuf {
        PathBuf::from(DEFAULT_SYSTEM_SETTINGS)
    }

    pub fn default_user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("settings.toml"))
    }

    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    pub fn verification(&self) -> Result<VerificationConfig, StateError> {
        let values = self.load_system()?.verification.unwrap_or_default();
        Ok(VerificationConfig {
            gpgv: values.gpgv.unwrap_or_else(|| PathBuf::from(DEFAULT_GPGV)),
            keyring: values
                .keyring
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYRING)),
        })
    }

    fn load_system(&self) -> Result<SettingsFile, StateError> {
        SettingsFile::load_or_default(&self.system_path).map_err(|source| StateError::System {
            path: self.system_path.clone(),
            source,
        })
    }

    fn load_user(&self) -> Result<SettingsFile, StateError> {
        SettingsFile::load_or_default(&self.user_path).map_err(|source| StateError::User {
            path: self.user_path.clone(),
            source,
        })
    }

    fn save_user(&self, settings: &SettingsFile) -> Result<(), StateError> {
        settings
            .save(&self.user_path)
            .map_err(|source| StateError::User {
                path: self.user_path.clone(),
                source,
            })
    }

    fn update_user(&self, change: impl FnOnce(&mut SettingsFile)) -> Result<(), StateError> {
        let mut settings = self.load_user()?;
        change(&mut settings);
        self.save_user(&settings)
    }
}

impl StateStore for FileStateStore {
    fn last_seen(&self, channel: &Channel) -> Result<Option<DateTime<Utc>>, StateError> {
        Ok(self.load_user()?.last_alert.get(channel.key()).copied())
    }

    fn set_last_seen(&self, channel: &Channel, at: DateTime<Utc>) -> Result<(), StateError> {
        debug!("Recording last alert for channel {} as {}", channel, at);
        self.update_user(|settings| {
            settings.last_alert.insert(channel.key().to_string(), at);
        })
    }

    fn clear_last_seen(&self, channel: &Channel) -> Result<(), StateError> {
        debug!("Clearing last alert for channel {}", channel);
        self.update_user(|settings| {
            settings.last_alert.remove(channel.key());
        })
    }

    fn preferences(&self) -> Result<Preferences, StateError> {
        let system = self.load_system()?;
        let user = self.load_user()?;
        Ok(Preferences::from_values(
            &user.preferences.overlay(&system.preferences),
        ))
    }

    /// Stores only the values that differ from what the system file (or the
    /// built-in default) would give, so unchanged keys keep following it.
    fn set_preferences(&self, preferences: &Preferences) -> Result<(), StateError> {
        let base = Preferences::from_values(&self.load_system()?.preferences);
        let wanted = preferences.to_values();

        let mut stored = PreferenceValues::default();
        if preferences.server != base.server {
            stored.server = wanted.server;
        }
        if preferences.interval != base.interval {
            stored.update_interval = wanted.update_interval;
        }
        if preferences.auto_startup != base.auto_startup {
            stored.auto_startup = wanted.auto_startup;
        }
        if preferences.channels != base.channels {
            stored.channels = wanted.channels;
        }

        self.update_user(|settings| settings.preferences = stored)
    }
}
