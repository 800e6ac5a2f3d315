//! Configuration file handling for `~/.airspace-cache/config.ini`.
//!
//! Missing files and missing keys fall back to the defaults in
//! [`super::settings`]; parsing lives in [`super::parser`].

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::AirspaceCacheConfig;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the INI file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Configuration loaded from an INI file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// File the settings were read from, if it existed.
    pub path: Option<PathBuf>,
    pub settings: AirspaceCacheConfig,
}

impl ConfigFile {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            settings: super::parser::parse_ini(&ini)?,
        })
    }

    /// Parse configuration from INI text.
    pub fn load_from_str(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content).map_err(ini::Error::Parse)?;
        Ok(Self {
            path: None,
            settings: super::parser::parse_ini(&ini)?,
        })
    }

    pub fn into_settings(self) -> AirspaceCacheConfig {
        self.settings
    }
}

/// Get the path to the config directory (~/.airspace-cache).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".airspace-cache")
}

/// Get the path to the config file (~/.airspace-cache/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Ensure the config directory exists, returning its path.
pub fn ensure_config_directory() -> Result<PathBuf, ConfigFileError> {
    let dir = config_directory();
    std::fs::create_dir_all(&dir).map_err(ConfigFileError::DirectoryError)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("nope.ini")).unwrap();
        assert!(config.path.is_none());
        assert_eq!(config.settings, AirspaceCacheConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(
            &config_path,
            r#"
[hot]
geometry_max_bytes = 8MB

[remote]
timeout = 15
"#,
        )
        .unwrap();

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config.path.as_deref(), Some(config_path.as_path()));
        assert_eq!(config.settings.hot.geometry_max_bytes, 8 * 1024 * 1024);
        assert_eq!(config.settings.remote.timeout.as_secs(), 15);
        assert_eq!(config.settings.hot.tile_max_items, 500);
    }

    #[test]
    fn test_config_path_is_under_home() {
        assert!(config_file_path().ends_with(".airspace-cache/config.ini"));
    }
}
