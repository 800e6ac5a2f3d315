//! CLI command implementations.
//!
//! - [`viewport`] - Resolve a viewport through the cache tiers
//! - [`cache`] - Persistent store statistics and clearing
//! - [`maintain`] - Run maintenance once or until interrupted

pub mod cache;
pub mod common;
pub mod maintain;
pub mod viewport;
