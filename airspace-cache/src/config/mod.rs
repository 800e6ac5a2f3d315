//! Configuration for the airspace cache.
//!
//! Component settings are plain structs with defaults and `with_*`
//! builders; [`ConfigFile`] overlays values from an INI file.
//!
//! ```
//! use airspace_cache::config::{AirspaceCacheConfig, RemoteConfig};
//!
//! let config = AirspaceCacheConfig::new("/tmp/airspace-cache")
//!     .with_grid_step(0.5)
//!     .with_remote(RemoteConfig::default().with_cancel_superseded(false));
//! assert!(!config.remote.cancel_superseded);
//! ```

mod file;
mod parser;
mod settings;
mod size;

pub use file::{
    config_directory, config_file_path, ensure_config_directory, ConfigFile, ConfigFileError,
};
pub use settings::*;
pub use size::{format_size, format_size_approx, parse_size, SizeParseError};
