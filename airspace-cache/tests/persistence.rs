mod common;

use std::sync::Arc;
use std::time::Duration;

use airspace_cache::config::PromotionConfig;
use airspace_cache::time::ManualClock;
use airspace_cache::{MaintenanceScheduler, TileStatus};
use common::*;
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_cold_tier_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(5_000));
    let viewport = bounds(46.0, 6.5, 46.5, 8.0);

    let first_ids: Vec<String> = {
        let cache = open(config(&dir), MockFetcher::new(swiss_world(), clock.clone()), &clock).await;
        let result = cache.get_airspaces_for_viewport(viewport, 9.0).await;
        assert!(result.is_complete());
        cache.dispose().await.unwrap();
        result.ids().into_iter().map(String::from).collect()
    };

    let fetcher = MockFetcher::new(swiss_world(), clock.clone());
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;
    assert_eq!(cache.statistics().cold_entries, 3 + 3);

    let result = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 0);
    assert_eq!(result.ids(), first_ids);
    assert!(result
        .tile_status
        .values()
        .all(|s| *s == TileStatus::ColdHit));
    assert_eq!(cache.statistics().cold_hits, 3);
}

#[tokio::test]
async fn test_hot_and_cold_copies_agree() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let cache = open(config(&dir), MockFetcher::new(swiss_world(), clock.clone()), &clock).await;

    cache
        .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 8.0), 9.0)
        .await;

    for id in ["A", "B", "C"] {
        let hot = cache.peek_hot_geometry(id).unwrap();
        let cold = cache.cold().peek_geometry(id).await.unwrap();
        assert_eq!(hot.content_digest(), cold.content_digest(), "{}", id);
        assert_eq!(hot.fetched_at, cold.fetched_at);
    }
}

#[tokio::test]
async fn test_expired_tiles_are_refetched() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone());
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;
    let viewport = bounds(46.0, 6.5, 46.5, 7.0);

    cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 1);

    clock.advance(23 * HOUR);
    let fresh = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 1);
    assert!(fresh.tile_status.values().all(|s| *s == TileStatus::HotHit));

    clock.advance(2 * HOUR);
    let refreshed = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 2);
    assert!(refreshed
        .tile_status
        .values()
        .all(|s| *s == TileStatus::Fetched));
    assert_eq!(refreshed.ids(), vec!["A"]);

    let tile = cache.grid().tiles_for(&viewport).into_iter().next().unwrap();
    assert_eq!(
        cache.cold().tile_meta(&tile).unwrap().fetched_at,
        airspace_cache::Clock::now_millis(clock.as_ref())
    );
}

#[tokio::test]
async fn test_refused_refetch_evicts_stale_hot_copy() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    // Anything bigger than a byte is refused once the hot tier holds data.
    let config = config(&dir).with_promotion(PromotionConfig {
        pressure_ratio: 0.0,
        large_entry_bytes: 1,
        ..Default::default()
    });
    let cache = open(config, MockFetcher::new(swiss_world(), clock.clone()), &clock).await;
    let viewport = bounds(46.0, 6.5, 46.5, 7.0);

    cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(cache.peek_hot_geometry("A").unwrap().fetched_at, 0);

    clock.advance(25 * HOUR);
    let refreshed = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(refreshed.ids(), vec!["A"]);

    let now = airspace_cache::Clock::now_millis(clock.as_ref());
    assert!(cache.peek_hot_geometry("A").is_none());
    assert_eq!(cache.cold().geometry_meta("A").unwrap().fetched_at, now);
}

#[tokio::test]
async fn test_maintenance_sweeps_expired_entries() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let cache = open(config(&dir), MockFetcher::new(swiss_world(), clock.clone()), &clock).await;
    cache
        .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 8.0), 9.0)
        .await;

    let scheduler = MaintenanceScheduler::new(cache.clone());

    clock.advance(2 * HOUR);
    let report = scheduler.run_once().await;
    assert_eq!(report.sweep.tiles_removed, 0);
    assert_eq!(report.errors, 0);

    // Past the tile TTL but inside the geometry TTL.
    clock.advance(24 * HOUR);
    let report = scheduler.run_once().await;
    assert_eq!(report.sweep.tiles_removed, 3);
    assert_eq!(report.sweep.geometries_removed, 0);

    clock.advance(7 * 24 * HOUR);
    let report = scheduler.run_once().await;
    assert_eq!(report.sweep.geometries_removed, 3);
    assert_eq!(cache.statistics().cold_entries, 0);
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone());
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;
    let viewport = bounds(46.0, 6.5, 46.5, 8.0);

    cache.get_airspaces_for_viewport(viewport, 9.0).await;
    cache.clear().await.unwrap();

    let stats = cache.statistics();
    assert_eq!(stats.hot_entries, 0);
    assert_eq!(stats.cold_entries, 0);
    assert!(cache.peek_hot_geometry("A").is_none());

    let result = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 2);
    assert_eq!(result.ids(), vec!["A", "B", "C"]);
}
