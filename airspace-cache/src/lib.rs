//! Airspace Cache - tiered geospatial cache for airspace geometry
//!
//! Resolves a map viewport into render-ready airspace polygons:
//!
//! 1. the viewport is split into fixed grid tiles ([`tiling`])
//! 2. each tile is looked up in the in-memory hot tier, then the persistent
//!    cold tier ([`cache`])
//! 3. tiles missing from both are fetched from the remote source in one
//!    batched call per connected region, with per-tile single-flight
//!    ([`fetch`])
//! 4. the combined set is deduplicated, simplified for the requested zoom
//!    and clipped where same-class airspaces overlap ([`geometry`])
//!
//! [`AirspaceCacheManager`] ties these together; [`MaintenanceScheduler`]
//! keeps the cold tier tidy in the background.
//!
//! # Example
//!
//! ```ignore
//! use airspace_cache::{AirspaceCacheConfig, AirspaceCacheManager, BoundingBox, HttpAirspaceFetcher};
//!
//! let config = AirspaceCacheConfig::default();
//! let fetcher = HttpAirspaceFetcher::from_config(&config.remote)?;
//! let cache = AirspaceCacheManager::open(config, fetcher).await?;
//!
//! let viewport = BoundingBox::new(45.0, 6.0, 47.0, 9.0)?;
//! let result = cache.get_airspaces_for_viewport(viewport, 9.0).await;
//! for airspace in &result.geometries {
//!     println!("{} {:?}", airspace.id, airspace.class);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geometry;
pub mod logging;
pub mod maintenance;
pub mod manager;
pub mod model;
pub mod tiling;
pub mod time;

pub use cache::{CacheStatistics, ColdCache, HotCache};
pub use config::{AirspaceCacheConfig, ConfigFile, ConfigFileError};
pub use error::AirspaceCacheError;
pub use fetch::{AirspaceFetcher, FetchError, FetchFailure, FetchResponse, HttpAirspaceFetcher};
pub use geometry::{ClipRule, ClippingEngine, SimplificationEngine};
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use manager::{AirspaceCacheManager, TileStatus, ViewportResult};
pub use model::{AirspaceClass, AirspaceGeometry, BoundingBox, Ring, VerticalLimit};
pub use tiling::{TileGrid, TileKey, TileMetadata};
pub use time::{Clock, ManualClock, SystemClock};
