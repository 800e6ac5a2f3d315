//! Errors surfaced by the cache lifecycle.
//!
//! Viewport lookups never fail; per-tile problems are reported through
//! [`crate::manager::TileStatus`]. Only opening, clearing and disposing the
//! cache can return an error.

use thiserror::Error;

use crate::cache::ColdCacheError;
use crate::tiling::TileGridError;

#[derive(Debug, Error)]
pub enum AirspaceCacheError {
    #[error("Invalid tile grid: {0}")]
    Grid(#[from] TileGridError),

    #[error("Cold cache error: {0}")]
    Cold(#[from] ColdCacheError),
}
