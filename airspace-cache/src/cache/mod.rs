//! Two-tier airspace cache.
//!
//! - [`hot`]: bounded in-memory LRU of geometries and tile records
//! - [`cold`]: durable, TTL-bound store that survives restarts
//! - [`simplified`]: memo of zoom-specific simplified geometry
//!
//! Eviction from the hot tier never touches the cold copy.

pub mod cold;
pub mod hot;
pub mod simplified;
pub mod stats;

pub use cold::{
    AccessRecord, ColdCache, ColdCacheError, ColdCacheStats, CompactionReport, EntryMeta,
    SweepReport,
};
pub use hot::{HotCache, HotCacheStats, PutOutcome, Weighted};
pub use simplified::SimplifiedCache;
pub use stats::CacheStatistics;
