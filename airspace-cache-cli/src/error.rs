//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use airspace_cache::cache::ColdCacheError;
use airspace_cache::config::ConfigFileError;
use airspace_cache::{AirspaceCacheError, FetchError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to open, clear or flush the cache
    Cache(AirspaceCacheError),
    /// Failed to build the remote fetcher
    Remote(FetchError),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// Failed to write output
    Output(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Remote(FetchError::Permanent(_)) = self {
            eprintln!();
            eprintln!("Set the airspace source with --endpoint or in config.ini:");
            eprintln!("  [remote]");
            eprintln!("  endpoint = https://example.org/api/airspaces");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::Remote(e) => write!(f, "Remote source error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Output(msg) => write!(f, "Failed to write output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Cache(e) => Some(e),
            CliError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<AirspaceCacheError> for CliError {
    fn from(e: AirspaceCacheError) -> Self {
        CliError::Cache(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Remote(e)
    }
}

impl From<ColdCacheError> for CliError {
    fn from(e: ColdCacheError) -> Self {
        CliError::Cache(AirspaceCacheError::from(e))
    }
}
