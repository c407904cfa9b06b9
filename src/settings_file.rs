use crate::util::atomic_write::{AtomicWriteError, write_atomically};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SettingsFileError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Unsupported settings file version: {0}")]
    UnsupportedVersion(u32),
    #[error("Write error: {0}")]
    Write(#[from] AtomicWriteError),
}

/// Raw preference values as they appear on disk.
///
/// Every key is optional so that a user file only carries the values the
/// user actually changed; everything else falls through to the system file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreferenceValues {
    #[serde(rename = "Server", skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Kept as text; interpreted case-insensitively when merged.
    #[serde(rename = "UpdateInterval", skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<String>,
    #[serde(rename = "AutoStartup", skip_serializing_if = "Option::is_none")]
    pub auto_startup: Option<bool>,
    #[serde(rename = "Channels", skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl PreferenceValues {
    pub fn is_empty(&self) -> bool {
        self == &PreferenceValues::default()
    }

    /// Values from `self` where set, `fallback` otherwise.
    pub fn overlay(&self, fallback: &PreferenceValues) -> PreferenceValues {
        PreferenceValues {
            server: self.server.clone().or_else(|| fallback.server.clone()),
            update_interval: self
                .update_interval
                .clone()
                .or_else(|| fallback.update_interval.clone()),
            auto_startup: self.auto_startup.or(fallback.auto_startup),
            channels: self.channels.clone().or_else(|| fallback.channels.clone()),
        }
    }
}

/// Location of the signature checker and its trust anchor.
///
/// Only honoured in the system-wide file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationValues {
    #[serde(rename = "Gpgv", skip_serializing_if = "Option::is_none")]
    pub gpgv: Option<PathBuf>,
    #[serde(rename = "Keyring", skip_serializing_if = "Option::is_none")]
    pub keyring: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    version: u32,
}

/// Helper struct to extract only the metadata section from a TOML file,
/// ignoring all other content. Used to check version before parsing the full file.
/// Note: We explicitly do NOT use deny_unknown_fields here, as this struct's
/// purpose is to ignore everything except metadata.
#[derive(Debug, Deserialize)]
struct MetadataOnly {
    metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    metadata: Metadata,
    #[serde(default, skip_serializing_if = "PreferenceValues::is_empty")]
    pub preferences: PreferenceValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationValues>,
    /// Last seen `Last-Modified` per channel key.
    #[serde(
        rename = "LastAlert",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub last_alert: BTreeMap<String, DateTime<Utc>>,
}

impl Default for SettingsFile {
    fn default() -> Self {
        SettingsFile::new()
    }
}

impl SettingsFile {
    const SUPPORTED_VERSION: u32 = 1;

    /// Create an empty SettingsFile with the current supported version
    pub fn new() -> Self {
        SettingsFile {
            metadata: Metadata {
                version: Self::SUPPORTED_VERSION,
            },
            preferences: PreferenceValues::default(),
            verification: None,
            last_alert: BTreeMap::new(),
        }
    }

    /// Parse a TOML string into a SettingsFile structure
    pub fn from_toml(content: &str) -> Result<Self, SettingsFileError> {
        // Check the version first so that a file written by a newer release
        // is reported as such rather than as a confusing parse error.
        let metadata_only: MetadataOnly = toml::from_str(content)?;

        if metadata_only.metadata.version != Self::SUPPORTED_VERSION {
            return Err(SettingsFileError::UnsupportedVersion(
                metadata_only.metadata.version,
            ));
        }

        let settings: SettingsFile = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize a SettingsFile structure to TOML string
    pub fn to_toml(&self) -> Result<String, SettingsFileError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a SettingsFile from the filesystem
    pub fn load(path: &Path) -> Result<Self, SettingsFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                SettingsFileError::PermissionDenied(path.to_path_buf())
            } else {
                SettingsFileError::Io(e)
            }
        })?;

        Self::from_toml(&content)
    }

    /// Load a SettingsFile, treating a missing file as an empty one.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsFileError> {
        match Self::load(path) {
            Ok(settings) => Ok(settings),
            Err(SettingsFileError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Save a SettingsFile to the filesystem atomically, creating the parent
    /// directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), SettingsFileError> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    SettingsFileError::PermissionDenied(parent.to_path_buf())
                } else {
                    SettingsFileError::Io(e)
                }
            })?;
        }

        write_atomically(path, content.as_bytes())?;
        Ok(())
    }
}
