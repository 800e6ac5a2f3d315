//! Statistics snapshot exposed to observability and settings surfaces.

use serde::Serialize;

use crate::config::format_size_approx;

/// Point-in-time cache statistics.
///
/// Hit and miss counters count tile lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hot_hits: u64,
    pub hot_misses: u64,
    pub cold_hits: u64,
    pub cold_misses: u64,
    /// Region fetches issued to the remote source.
    pub remote_fetches: u64,
    pub hot_size_bytes: u64,
    pub cold_size_bytes: u64,
    /// Tile lookups that joined a fetch already in flight.
    pub coalesced_requests: u64,
    pub fetch_failures: u64,
    pub promotions: u64,
    pub hot_evictions: u64,
    pub hot_entries: usize,
    pub cold_entries: usize,
    pub cold_corruptions: u64,
}

impl CacheStatistics {
    /// Share of tile lookups served without touching the remote source.
    pub fn local_hit_rate(&self) -> f64 {
        let lookups = self.hot_hits + self.hot_misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hot_hits + self.cold_hits) as f64 / lookups as f64
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "hot {}/{} hits ({}), cold {}/{} hits ({}), {} remote fetches, {} failures",
            self.hot_hits,
            self.hot_hits + self.hot_misses,
            format_size_approx(self.hot_size_bytes),
            self.cold_hits,
            self.cold_hits + self.cold_misses,
            format_size_approx(self.cold_size_bytes),
            self.remote_fetches,
            self.fetch_failures,
        )
    }
}
