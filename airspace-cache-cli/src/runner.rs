//! Shared setup for CLI commands: configuration and logging.

use std::path::PathBuf;

use airspace_cache::config::{AirspaceCacheConfig, ConfigFile};
use airspace_cache::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Options accepted by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    settings: AirspaceCacheConfig,
}

impl CliRunner {
    /// Load configuration, apply command-line overrides and start logging.
    pub fn new(options: &GlobalOptions) -> Result<Self, CliError> {
        let file = match &options.config {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        let source = file.path.clone();
        let mut settings = file.into_settings();
        if let Some(dir) = &options.cache_dir {
            settings.cold.directory = dir.clone();
        }

        let logging_guard = init_logging(&default_log_dir(), default_log_file())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        match source {
            Some(path) => info!(config = %path.display(), "Loaded configuration"),
            None => info!("No configuration file, using defaults"),
        }

        Ok(Self {
            logging_guard,
            settings,
        })
    }

    pub fn settings(&self) -> &AirspaceCacheConfig {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut AirspaceCacheConfig {
        &mut self.settings
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command,
            cache_dir = %self.settings.cold.directory.display(),
            "Airspace cache CLI starting"
        );
    }
}
