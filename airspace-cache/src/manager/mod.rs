//! Viewport orchestration over the cache tiers.
//!
//! # Request flow
//!
//! ```text
//! viewport ──► TileGrid::tiles_for ──► hot tier ──► cold tier ──► remote
//!                                          │            │            │
//!                                          ▼            ▼            ▼
//!                                       HotHit       ColdHit    Fetched / Coalesced
//!                                                   (promote?)  (store both tiers)
//!                                          └────────────┴────────────┘
//!                                                       │
//!                                     dedupe by id ─► simplify ─► clip
//! ```
//!
//! Missing tiles are registered with the single-flight registry. Tiles this
//! request leads are grouped into 4-connected regions and each region is
//! fetched by one spawned task, so a caller giving up never strands the
//! requests coalesced onto its fetch.
//!
//! A failure on one tile never fails the viewport: the tile gets a
//! [`TileStatus::Failed`] marker and the rest is returned.

mod promotion;
mod viewport;

pub use promotion::{PromotionCandidate, PromotionPolicy};
pub use viewport::{TileStatus, ViewportResult};
pub(crate) use viewport::{TileOutcome, TileResolution};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStatistics, ColdCache, HotCache, SimplifiedCache};
use crate::config::AirspaceCacheConfig;
use crate::error::AirspaceCacheError;
use crate::fetch::{
    fetch_with_retry, AirspaceFetcher, FetchFailure, FetchResponse, InFlightRegistry, Registration,
    RetryPolicy,
};
use crate::geometry::ClippingEngine;
use crate::maintenance::MaintenanceScheduler;
use crate::model::{AirspaceGeometry, BoundingBox};
use crate::tiling::{connected_regions, TileGrid, TileKey, TileMetadata};
use crate::time::{duration_millis, Clock, SystemClock};

#[derive(Default)]
struct Counters {
    cold_hits: AtomicU64,
    cold_misses: AtomicU64,
    remote_fetches: AtomicU64,
    fetch_failures: AtomicU64,
    promotions: AtomicU64,
}

/// A spawned region fetch and the token that aborts it.
type SpawnedRegion = (BTreeSet<TileKey>, CancellationToken);

/// The most recent viewport request and the tiles it covers.
#[derive(Default)]
struct LatestRequest {
    token: CancellationToken,
    tiles: BTreeSet<TileKey>,
}

struct ManagerInner<F> {
    config: AirspaceCacheConfig,
    grid: TileGrid,
    clock: Arc<dyn Clock>,
    fetcher: Arc<F>,
    retry: RetryPolicy,
    geometry_ttl_ms: i64,
    tile_ttl_ms: i64,
    hot_geometries: HotCache<String, AirspaceGeometry>,
    hot_tiles: HotCache<TileKey, TileMetadata>,
    cold: ColdCache,
    simplified: SimplifiedCache,
    clipper: ClippingEngine,
    promotion: PromotionPolicy,
    in_flight: InFlightRegistry<TileOutcome>,
    current_request: Mutex<LatestRequest>,
    maintenance: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    counters: Counters,
}

/// Tiles of one region fetch not yet completed.
///
/// Dropping the flight completes whatever is left with a failure so that
/// waiters are never stranded by a panicking or aborted task.
struct RegionFlight<'a> {
    registry: &'a InFlightRegistry<TileOutcome>,
    pending: BTreeSet<TileKey>,
}

impl RegionFlight<'_> {
    fn complete(&mut self, key: &TileKey, outcome: TileOutcome) {
        if self.pending.remove(key) {
            self.registry.complete(key, outcome);
        }
    }

    fn complete_all(&mut self, outcome: TileOutcome) {
        for key in std::mem::take(&mut self.pending) {
            self.registry.complete(&key, outcome.clone());
        }
    }
}

impl Drop for RegionFlight<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.complete_all(TileOutcome::Failed(FetchFailure {
                retryable: true,
                message: "region fetch aborted".to_string(),
            }));
        }
    }
}

impl<F: AirspaceFetcher> ManagerInner<F> {
    /// Token of the newest live request if it covers `key`.
    fn latest_request_for(&self, key: &TileKey) -> Option<CancellationToken> {
        let latest = self.current_request.lock();
        (!latest.token.is_cancelled() && latest.tiles.contains(key)).then(|| latest.token.clone())
    }

    fn tile_expired(&self, tile: &TileMetadata, now: i64) -> bool {
        now.saturating_sub(tile.fetched_at) >= self.tile_ttl_ms
    }

    fn geometry_expired(&self, geometry: &AirspaceGeometry, now: i64) -> bool {
        now.saturating_sub(geometry.fetched_at) >= self.geometry_ttl_ms
    }

    /// Offer a geometry to the hot tier. Returns true if it was inserted.
    ///
    /// A refused fresh copy evicts any older hot copy under the same id.
    fn consider_geometry(&self, geometry: &Arc<AirspaceGeometry>, just_fetched: bool) -> bool {
        let candidate = PromotionCandidate {
            size_bytes: geometry.size_bytes,
            access_count: geometry.access_count,
            just_fetched,
            bounds: geometry.bounding_box(),
        };
        let hot = &self.hot_geometries;
        if !self
            .promotion
            .should_promote(&candidate, hot.size_bytes(), hot.max_bytes())
        {
            if just_fetched {
                hot.invalidate(&geometry.id);
            }
            return false;
        }
        let outcome = hot.put(geometry.id.clone(), Arc::clone(geometry));
        if outcome.inserted && !just_fetched {
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        }
        outcome.inserted
    }

    /// Offer a tile record to the hot tier. Returns true if it was inserted.
    fn consider_tile(&self, tile: &Arc<TileMetadata>, access_count: u64, just_fetched: bool) -> bool {
        let candidate = PromotionCandidate {
            size_bytes: tile.size_bytes(),
            access_count,
            just_fetched,
            bounds: Some(self.grid.tile_bounds(&tile.key)),
        };
        let hot = &self.hot_tiles;
        if !self
            .promotion
            .should_promote(&candidate, hot.size_bytes(), hot.max_bytes())
        {
            if just_fetched {
                hot.invalidate(&tile.key);
            }
            return false;
        }
        let outcome = hot.put(tile.key, Arc::clone(tile));
        if outcome.inserted && !just_fetched {
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        }
        outcome.inserted
    }

    /// Resolve every geometry a tile refers to, or `None` if any of them is
    /// no longer available locally.
    async fn resolve_geometries(
        &self,
        tile: &TileMetadata,
        now: i64,
    ) -> Option<Vec<Arc<AirspaceGeometry>>> {
        let mut geometries = Vec::with_capacity(tile.airspace_ids.len());
        for id in &tile.airspace_ids {
            if let Some(geometry) = self.hot_geometries.get(id) {
                if !self.geometry_expired(&geometry, now) {
                    geometries.push(geometry);
                    continue;
                }
                self.hot_geometries.invalidate(id);
            }
            let geometry = Arc::new(self.cold.get_geometry(id).await?);
            self.consider_geometry(&geometry, false);
            geometries.push(geometry);
        }
        Some(geometries)
    }

    /// Whether an unexpired record of `key` sits in either tier, without
    /// touching recency or access counts.
    fn tile_stored(&self, key: &TileKey, now: i64) -> bool {
        self.hot_tiles
            .peek(key)
            .is_some_and(|tile| !self.tile_expired(&tile, now))
            || self
                .cold
                .tile_meta(key)
                .is_some_and(|meta| now.saturating_sub(meta.fetched_at) < self.tile_ttl_ms)
    }

    /// Resolve a tile from the hot or cold tier.
    async fn resolve_local(&self, key: &TileKey) -> Option<(TileStatus, TileResolution)> {
        let now = self.clock.now_millis();

        if let Some(tile) = self.hot_tiles.get(key) {
            if !self.tile_expired(&tile, now) {
                if let Some(geometries) = self.resolve_geometries(&tile, now).await {
                    return Some((TileStatus::HotHit, TileResolution { tile, geometries }));
                }
            }
            self.hot_tiles.invalidate(key);
        }

        let Some(tile) = self.cold.get_tile(key).await else {
            self.counters.cold_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let Some(geometries) = self.resolve_geometries(&tile, now).await else {
            debug!(tile = %key, "Tile refers to unavailable geometry, refetching");
            self.counters.cold_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        self.counters.cold_hits.fetch_add(1, Ordering::Relaxed);
        let access_count = self.cold.tile_meta(key).map_or(0, |m| m.access_count);
        let tile = Arc::new(tile);
        self.consider_tile(&tile, access_count, false);
        Some((TileStatus::ColdHit, TileResolution { tile, geometries }))
    }

    /// Persist a region's fetch result and build per-tile resolutions.
    ///
    /// Geometries are written before the tile records that refer to them.
    async fn store_region(
        &self,
        region: &BTreeSet<TileKey>,
        response: FetchResponse,
    ) -> Vec<(TileKey, TileResolution)> {
        let fetched_at = response.fetched_at;
        let mut unique: BTreeMap<String, AirspaceGeometry> = BTreeMap::new();
        for mut geometry in response.geometries {
            geometry.fetched_at = fetched_at;
            geometry.last_accessed = fetched_at;
            geometry.access_count = 0;
            unique.insert(geometry.id.clone(), geometry);
        }
        let geometries: Vec<(Arc<AirspaceGeometry>, Option<BoundingBox>)> = unique
            .into_values()
            .map(|g| {
                let bounds = g.bounding_box();
                (Arc::new(g), bounds)
            })
            .collect();

        let results = join_all(geometries.iter().map(|(g, _)| self.cold.store_geometry(g))).await;
        for ((geometry, _), result) in geometries.iter().zip(results) {
            if let Err(e) = result {
                warn!(id = %geometry.id, error = %e, "Failed to persist airspace geometry");
            }
            self.consider_geometry(geometry, true);
        }

        let resolutions: Vec<(TileKey, TileResolution)> = region
            .iter()
            .map(|key| {
                let tile_bounds = self.grid.tile_bounds(key);
                let members: Vec<Arc<AirspaceGeometry>> = geometries
                    .iter()
                    .filter(|(_, bounds)| bounds.is_some_and(|b| b.intersects(&tile_bounds)))
                    .map(|(g, _)| Arc::clone(g))
                    .collect();
                let ids = members.iter().map(|g| g.id.clone()).collect();
                let tile = Arc::new(TileMetadata::new(*key, ids, fetched_at));
                (
                    *key,
                    TileResolution {
                        tile,
                        geometries: members,
                    },
                )
            })
            .collect();

        let results = join_all(
            resolutions
                .iter()
                .map(|(_, r)| self.cold.store_tile(&r.tile)),
        )
        .await;
        for ((key, resolution), result) in resolutions.iter().zip(results) {
            if let Err(e) = result {
                warn!(tile = %key, error = %e, "Failed to persist tile record");
            }
            self.consider_tile(&resolution.tile, 0, true);
        }

        resolutions
    }

    /// Fetch one region and publish an outcome for each of its tiles.
    async fn fetch_region(&self, region: BTreeSet<TileKey>, cancel: CancellationToken) {
        let mut flight = RegionFlight {
            registry: &self.in_flight,
            pending: region.clone(),
        };
        let Some(bounds) = self.grid.region_bounds(region.iter()) else {
            return;
        };

        self.counters.remote_fetches.fetch_add(1, Ordering::Relaxed);
        debug!(tiles = region.len(), bounds = %bounds, "Fetching airspace region");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = fetch_with_retry(self.fetcher.as_ref(), bounds, &self.retry) => Some(result),
        };

        match result {
            None => {
                debug!(bounds = %bounds, "Region fetch cancelled, no waiters left");
                flight.complete_all(TileOutcome::Cancelled);
            }
            Some(Err(e)) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(bounds = %bounds, tiles = region.len(), error = %e, "Remote airspace fetch failed");
                flight.complete_all(TileOutcome::Failed(FetchFailure::from(&e)));
            }
            Some(Ok(response)) => {
                let count = response.geometries.len();
                for (key, resolution) in self.store_region(&region, response).await {
                    flight.complete(&key, TileOutcome::Fetched(Arc::new(resolution)));
                }
                debug!(bounds = %bounds, geometries = count, "Region fetch complete");
            }
        }
    }
}

/// Entry point of the airspace cache.
///
/// A cheap-to-clone handle; clones share the same caches. Construct once
/// with [`open`](Self::open) and release with [`dispose`](Self::dispose).
pub struct AirspaceCacheManager<F> {
    inner: Arc<ManagerInner<F>>,
}

impl<F> Clone for AirspaceCacheManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: AirspaceFetcher> AirspaceCacheManager<F> {
    /// Open the cache with the system clock.
    pub async fn open(config: AirspaceCacheConfig, fetcher: F) -> Result<Self, AirspaceCacheError> {
        Self::open_with_clock(config, fetcher, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: AirspaceCacheConfig,
        fetcher: F,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AirspaceCacheError> {
        let grid = TileGrid::new(config.grid.step_degrees)?;
        let cold = ColdCache::open(&config.cold, Arc::clone(&clock)).await?;

        info!(
            cache_dir = %config.cold.directory.display(),
            grid_step = grid.step_degrees(),
            hot_geometries = config.hot.geometry_max_items,
            hot_tiles = config.hot.tile_max_items,
            "Airspace cache opened"
        );

        let inner = ManagerInner {
            grid,
            clock,
            fetcher: Arc::new(fetcher),
            retry: RetryPolicy::from_config(&config.remote),
            geometry_ttl_ms: duration_millis(config.cold.geometry_ttl),
            tile_ttl_ms: duration_millis(config.cold.tile_ttl),
            hot_geometries: HotCache::new(
                config.hot.geometry_max_items,
                config.hot.geometry_max_bytes,
            ),
            hot_tiles: HotCache::new(config.hot.tile_max_items, config.hot.tile_max_bytes),
            cold,
            simplified: SimplifiedCache::new(config.simplification.clone()),
            clipper: ClippingEngine::new(),
            promotion: PromotionPolicy::new(config.promotion.clone()),
            in_flight: InFlightRegistry::new(),
            current_request: Mutex::new(LatestRequest::default()),
            maintenance: Mutex::new(None),
            counters: Counters::default(),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &AirspaceCacheConfig {
        &self.inner.config
    }

    pub fn grid(&self) -> &TileGrid {
        &self.inner.grid
    }

    pub fn cold(&self) -> &ColdCache {
        &self.inner.cold
    }

    pub fn clipping_engine(&self) -> &ClippingEngine {
        &self.inner.clipper
    }

    /// Render-ready airspaces for `bounds` at map `zoom`.
    ///
    /// Never fails: unresolved tiles are reported in
    /// [`ViewportResult::tile_status`] and everything that resolved is
    /// returned.
    pub async fn get_airspaces_for_viewport(&self, bounds: BoundingBox, zoom: f64) -> ViewportResult {
        let keys = self.inner.grid.tiles_for(&bounds);
        let request = self.begin_request(&keys);

        let mut tile_status = BTreeMap::new();
        let mut found: BTreeMap<String, Arc<AirspaceGeometry>> = BTreeMap::new();
        let mut missing = BTreeSet::new();

        for key in &keys {
            match self.inner.resolve_local(key).await {
                Some((status, resolution)) => {
                    for geometry in resolution.geometries {
                        found.entry(geometry.id.clone()).or_insert(geometry);
                    }
                    tile_status.insert(*key, status);
                }
                None => {
                    missing.insert(*key);
                }
            }
        }

        if !missing.is_empty() {
            self.resolve_remote(missing, &request, &mut tile_status, &mut found)
                .await;
        }

        let geometries = self.prepare(found, zoom).await;
        debug!(
            bounds = %bounds,
            zoom,
            tiles = keys.len(),
            geometries = geometries.len(),
            "Viewport resolved"
        );
        ViewportResult {
            geometries,
            tile_status,
        }
    }

    /// Start a new request, superseding the previous one if configured.
    ///
    /// A superseded request keeps waiting on the tiles the new request also
    /// covers; see [`await_tile`](Self::await_tile).
    fn begin_request(&self, keys: &BTreeSet<TileKey>) -> CancellationToken {
        let token = CancellationToken::new();
        if self.inner.config.remote.cancel_superseded {
            let latest = LatestRequest {
                token: token.clone(),
                tiles: keys.clone(),
            };
            let previous = std::mem::replace(&mut *self.inner.current_request.lock(), latest);
            previous.token.cancel();
        }
        token
    }

    async fn resolve_remote(
        &self,
        missing: BTreeSet<TileKey>,
        request: &CancellationToken,
        tile_status: &mut BTreeMap<TileKey, TileStatus>,
        found: &mut BTreeMap<String, Arc<AirspaceGeometry>>,
    ) {
        let mut registrations = Vec::with_capacity(missing.len());
        let mut leading = BTreeSet::new();
        for key in missing {
            let registration = self.inner.in_flight.register(key);
            if registration.is_leader() {
                leading.insert(key);
            }
            registrations.push((key, registration));
        }

        // A fetch may have landed between the local lookup and registering.
        let now = self.inner.clock.now_millis();
        let stored: Vec<TileKey> = leading
            .iter()
            .copied()
            .filter(|key| self.inner.tile_stored(key, now))
            .collect();
        let mut settled = BTreeMap::new();
        for key in stored {
            if let Some((status, resolution)) = self.inner.resolve_local(&key).await {
                let resolution = Arc::new(resolution);
                self.inner
                    .in_flight
                    .complete(&key, TileOutcome::Fetched(Arc::clone(&resolution)));
                leading.remove(&key);
                settled.insert(key, (status, resolution));
            }
        }

        let mut spawned: Vec<SpawnedRegion> = connected_regions(&leading)
            .into_iter()
            .map(|region| {
                let token = self.spawn_region_fetch(region.clone());
                (region, token)
            })
            .collect();

        for (key, registration) in registrations {
            let (status, resolution) = match settled.remove(&key) {
                Some((status, resolution)) => (status, Some(resolution)),
                None => {
                    self.await_tile(key, registration, request, &mut spawned)
                        .await
                }
            };
            if let Some(resolution) = resolution {
                for geometry in &resolution.geometries {
                    found
                        .entry(geometry.id.clone())
                        .or_insert_with(|| Arc::clone(geometry));
                }
            }
            tile_status.insert(key, status);
        }

        if request.is_cancelled() {
            for (region, token) in &spawned {
                if region.iter().all(|k| self.inner.in_flight.waiters(k) == 0) {
                    token.cancel();
                }
            }
        }
    }

    fn spawn_region_fetch(&self, region: BTreeSet<TileKey>) -> CancellationToken {
        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let cancel = token.clone();
        tokio::spawn(async move {
            inner.fetch_region(region, cancel).await;
        });
        token
    }

    /// Wait for a tile's fetch outcome.
    ///
    /// When this request is superseded, waiting continues if the newest
    /// request covers the tile too, now bound to that request's lifetime.
    /// Otherwise the tile is reported as cancelled. If the fetch itself is
    /// cancelled while this request still wants the tile, the tile is
    /// registered again once.
    async fn await_tile(
        &self,
        key: TileKey,
        registration: Registration<TileOutcome>,
        request: &CancellationToken,
        spawned: &mut Vec<SpawnedRegion>,
    ) -> (TileStatus, Option<Arc<TileResolution>>) {
        let mut coalesced = !registration.is_leader();
        let mut rx = registration.into_receiver();
        let mut rejoined = false;
        let mut watch = request.clone();

        loop {
            let received = tokio::select! {
                biased;
                _ = watch.cancelled() => None,
                received = rx.recv() => Some(received),
            };
            let Some(received) = received else {
                match self.inner.latest_request_for(&key) {
                    Some(latest) => {
                        watch = latest;
                        continue;
                    }
                    None => return (TileStatus::Cancelled, None),
                }
            };

            match received {
                Ok(TileOutcome::Fetched(resolution)) => {
                    let status = if coalesced {
                        TileStatus::Coalesced
                    } else {
                        TileStatus::Fetched
                    };
                    return (status, Some(resolution));
                }
                Ok(TileOutcome::Failed(failure)) => return (TileStatus::Failed(failure), None),
                Ok(TileOutcome::Cancelled) if !rejoined => {
                    rejoined = true;
                    let registration = self.inner.in_flight.register(key);
                    coalesced = !registration.is_leader();
                    if registration.is_leader() {
                        let region = BTreeSet::from([key]);
                        let token = self.spawn_region_fetch(region.clone());
                        spawned.push((region, token));
                    }
                    rx = registration.into_receiver();
                }
                Ok(TileOutcome::Cancelled) => return (TileStatus::Cancelled, None),
                Err(e) => {
                    return (
                        TileStatus::Failed(FetchFailure {
                            retryable: true,
                            message: format!("fetch ended without a result: {}", e),
                        }),
                        None,
                    )
                }
            }
        }
    }

    /// Simplify for `zoom`, then clip overlapping airspaces.
    async fn prepare(
        &self,
        found: BTreeMap<String, Arc<AirspaceGeometry>>,
        zoom: f64,
    ) -> Vec<Arc<AirspaceGeometry>> {
        let geometries: Vec<_> = found.into_values().collect();
        let simplified = self.inner.simplified.simplify_all(geometries, zoom).await;
        if !self.inner.config.clipping.enabled || simplified.len() < 2 {
            return simplified;
        }

        let inner = Arc::clone(&self.inner);
        let unclipped = simplified.clone();
        match tokio::task::spawn_blocking(move || inner.clipper.clip_overlaps(simplified)).await {
            Ok(clipped) => clipped,
            Err(e) => {
                warn!(error = %e, "Clipping task failed, returning unclipped geometry");
                unclipped
            }
        }
    }

    /// Offer a cold-tier geometry to the hot tier, as maintenance pre-warm
    /// does. Returns true if it was inserted.
    pub fn promote_from_cold(&self, geometry: AirspaceGeometry) -> bool {
        self.inner.consider_geometry(&Arc::new(geometry), false)
    }

    pub fn hot_contains_geometry(&self, id: &str) -> bool {
        self.inner.hot_geometries.contains(&id.to_string())
    }

    /// The hot-tier copy of a geometry, without touching recency.
    pub fn peek_hot_geometry(&self, id: &str) -> Option<Arc<AirspaceGeometry>> {
        self.inner.hot_geometries.peek(&id.to_string())
    }

    pub fn promotion_policy(&self) -> &PromotionPolicy {
        &self.inner.promotion
    }

    /// Spawn the background maintenance scheduler. No-op if running.
    pub fn start_maintenance(&self) {
        let mut slot = self.inner.maintenance.lock();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let scheduler = MaintenanceScheduler::new(self.clone());
        let handle = tokio::spawn(scheduler.run(token.clone()));
        *slot = Some((token, handle));
    }

    /// Stop background work and flush the cold tier.
    pub async fn dispose(&self) -> Result<(), AirspaceCacheError> {
        let running = self.inner.maintenance.lock().take();
        if let Some((token, handle)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
        self.inner.current_request.lock().token.cancel();
        self.inner.cold.flush().await?;
        info!("Airspace cache disposed");
        Ok(())
    }

    /// Remove every cached entry from both tiers.
    pub async fn clear(&self) -> Result<(), AirspaceCacheError> {
        self.inner.hot_geometries.clear();
        self.inner.hot_tiles.clear();
        self.inner.simplified.clear().await;
        self.inner.cold.clear().await?;
        info!("Airspace cache cleared");
        Ok(())
    }

    pub fn statistics(&self) -> CacheStatistics {
        let inner = &self.inner;
        let hot_tiles = inner.hot_tiles.stats();
        let hot_geometries = inner.hot_geometries.stats();
        let cold = inner.cold.stats();
        CacheStatistics {
            hot_hits: hot_tiles.hits,
            hot_misses: hot_tiles.misses,
            cold_hits: inner.counters.cold_hits.load(Ordering::Relaxed),
            cold_misses: inner.counters.cold_misses.load(Ordering::Relaxed),
            remote_fetches: inner.counters.remote_fetches.load(Ordering::Relaxed),
            hot_size_bytes: hot_tiles.size_bytes + hot_geometries.size_bytes,
            cold_size_bytes: cold.stored_bytes,
            coalesced_requests: inner.in_flight.coalesced_requests(),
            fetch_failures: inner.counters.fetch_failures.load(Ordering::Relaxed),
            promotions: inner.counters.promotions.load(Ordering::Relaxed),
            hot_evictions: hot_tiles.evictions + hot_geometries.evictions,
            hot_entries: hot_tiles.entries + hot_geometries.entries,
            cold_entries: cold.geometry_entries + cold.tile_entries,
            cold_corruptions: cold.corruptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::model::{AirspaceClass, Ring, VerticalLimit};
    use crate::time::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Counts calls and serves nothing.
    #[derive(Default)]
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl AirspaceFetcher for CountingFetcher {
        async fn fetch_airspaces(&self, _bounds: BoundingBox) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchResponse {
                geometries: Vec::new(),
                fetched_at: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_leader_settles_tile_stored_after_lookup() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let fetcher = CountingFetcher::default();
        let calls = Arc::clone(&fetcher.calls);
        let cache = AirspaceCacheManager::open_with_clock(
            AirspaceCacheConfig::new(dir.path()),
            fetcher,
            clock,
        )
        .await
        .unwrap();

        let viewport = BoundingBox::new(46.0, 6.5, 46.5, 7.0).unwrap();
        let key = *cache.grid().tiles_for(&viewport).iter().next().unwrap();

        // Another fetch stores the tile after this request's local lookup missed.
        let geometry = AirspaceGeometry::new(
            "A",
            "A airspace",
            AirspaceClass::D,
            VerticalLimit::ground(),
            VerticalLimit::feet_msl(4500.0),
            vec![Ring::from_lon_lat(&[
                (6.6, 46.1),
                (6.9, 46.1),
                (6.9, 46.4),
                (6.6, 46.4),
            ])],
            1_000,
        );
        cache.cold().store_geometry(&geometry).await.unwrap();
        cache
            .cold()
            .store_tile(&TileMetadata::new(key, BTreeSet::from(["A".to_string()]), 1_000))
            .await
            .unwrap();

        let request = CancellationToken::new();
        let mut tile_status = BTreeMap::new();
        let mut found = BTreeMap::new();
        cache
            .resolve_remote(BTreeSet::from([key]), &request, &mut tile_status, &mut found)
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tile_status[&key], TileStatus::ColdHit);
        assert!(found.contains_key("A"));
        assert_eq!(cache.inner.in_flight.waiters(&key), 0);
        assert_eq!(cache.statistics().remote_fetches, 0);
    }
}
