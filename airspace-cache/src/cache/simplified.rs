//! Memo of display-simplified geometries.
//!
//! Both cache tiers keep full-fidelity geometry. Simplified derivatives are
//! computed per requested zoom and memoised here, keyed by airspace id,
//! tolerance and fetch time so a refetched geometry never reuses a stale
//! derivative. The memo is bounded by bytes and evicts on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use tracing::{debug, warn};

use crate::config::SimplificationConfig;
use crate::geometry::SimplificationEngine;
use crate::model::AirspaceGeometry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SimplifiedKey {
    id: String,
    tolerance_bits: u64,
    fetched_at: i64,
}

impl SimplifiedKey {
    fn new(geometry: &AirspaceGeometry, tolerance: f64) -> Self {
        Self {
            id: geometry.id.clone(),
            tolerance_bits: tolerance.to_bits(),
            fetched_at: geometry.fetched_at,
        }
    }
}

/// Read-time simplification with a bounded memo.
pub struct SimplifiedCache {
    engine: Arc<SimplificationEngine>,
    memo: Cache<SimplifiedKey, Arc<AirspaceGeometry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SimplifiedCache {
    pub fn new(config: SimplificationConfig) -> Self {
        let memo = Cache::builder()
            .weigher(|_key: &SimplifiedKey, value: &Arc<AirspaceGeometry>| -> u32 {
                value.size_bytes.min(u32::MAX as u64) as u32
            })
            .max_capacity(config.memo_max_bytes)
            .build();

        Self {
            engine: Arc::new(SimplificationEngine::new(config)),
            memo,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &SimplificationEngine {
        &self.engine
    }

    /// Simplify every geometry for display at `zoom`.
    ///
    /// Memoised derivatives are reused; the rest are simplified in parallel
    /// on the blocking pool. Degenerate geometries are dropped. Output is
    /// ordered by id.
    pub async fn simplify_all(
        &self,
        geometries: Vec<Arc<AirspaceGeometry>>,
        zoom: f64,
    ) -> Vec<Arc<AirspaceGeometry>> {
        let mut out = Vec::with_capacity(geometries.len());
        let mut originals = Vec::new();
        let mut pending = Vec::new();

        for geometry in geometries {
            let tolerance = self.engine.tolerance_for(zoom, &geometry);
            if tolerance <= 0.0 || geometry.tolerance == tolerance {
                out.push(geometry);
                continue;
            }
            match self.memo.get(&SimplifiedKey::new(&geometry, tolerance)).await {
                Some(simplified) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    out.push(simplified);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    pending.push(((*geometry).clone(), tolerance));
                    originals.push(geometry);
                }
            }
        }

        if !pending.is_empty() {
            let engine = Arc::clone(&self.engine);
            let count = pending.len();
            match tokio::task::spawn_blocking(move || engine.simplify_batch(&pending)).await {
                Ok(simplified) => {
                    debug!(requested = count, simplified = simplified.len(), zoom, "Simplified geometries");
                    for geometry in simplified {
                        let geometry = Arc::new(geometry);
                        let key = SimplifiedKey::new(&geometry, geometry.tolerance);
                        self.memo.insert(key, Arc::clone(&geometry)).await;
                        out.push(geometry);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Simplification task failed, returning full fidelity");
                    out.extend(originals);
                }
            }
        }

        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Memo hits and misses.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub async fn clear(&self) {
        self.memo.invalidate_all();
        self.memo.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AirspaceClass, Ring, VerticalLimit};
    use geo::Coord;
    use std::f64::consts::PI;

    fn circle(id: &str, lower: VerticalLimit) -> Arc<AirspaceGeometry> {
        let points = (0..400)
            .map(|i| {
                let a = 2.0 * PI * i as f64 / 400.0;
                Coord {
                    x: 8.0 + 0.2 * a.cos(),
                    y: 46.0 + 0.2 * a.sin(),
                }
            })
            .collect();
        Arc::new(AirspaceGeometry::new(
            id,
            id,
            AirspaceClass::C,
            lower,
            VerticalLimit::flight_level(195),
            vec![Ring::new(points)],
            1_000,
        ))
    }

    #[tokio::test]
    async fn test_simplifies_and_memoises() {
        let cache = SimplifiedCache::new(SimplificationConfig::default());
        let input = vec![circle("B", VerticalLimit::ground()), circle("A", VerticalLimit::ground())];

        let first = cache.simplify_all(input.clone(), 6.0).await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "A");
        assert!(first[0].vertex_count() < input[1].vertex_count());
        assert!(!first[0].is_full_fidelity());
        assert_eq!(cache.counters(), (0, 2));

        let second = cache.simplify_all(input, 6.0).await;
        assert_eq!(cache.counters(), (2, 2));
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }

    #[tokio::test]
    async fn test_source_stays_full_fidelity() {
        let cache = SimplifiedCache::new(SimplificationConfig::default());
        let source = circle("A", VerticalLimit::ground());
        let coarse = cache.simplify_all(vec![Arc::clone(&source)], 6.0).await;
        let fine = cache.simplify_all(vec![Arc::clone(&source)], 12.0).await;

        assert!(source.is_full_fidelity());
        assert!(fine[0].vertex_count() > coarse[0].vertex_count());
    }

    #[tokio::test]
    async fn test_high_altitude_uses_coarse_tolerance() {
        let cache = SimplifiedCache::new(SimplificationConfig::default());
        let high = circle("A", VerticalLimit::flight_level(150));
        let out = cache.simplify_all(vec![high], 14.0).await;
        assert_eq!(out[0].tolerance, SimplificationConfig::default().coarse_tolerance);
    }
}
