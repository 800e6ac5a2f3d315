mod common;

use std::sync::Arc;
use std::time::Duration;

use airspace_cache::config::RemoteConfig;
use airspace_cache::fetch::FetchError;
use airspace_cache::time::ManualClock;
use airspace_cache::TileStatus;
use common::*;
use tempfile::TempDir;

#[tokio::test]
async fn test_second_identical_viewport_needs_no_fetch() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone());
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;

    let viewport = bounds(45.0, 6.0, 47.0, 9.0);
    let first = cache.get_airspaces_for_viewport(viewport, 9.0).await;

    // 4 rows x 6 columns of 0.5 degree cells.
    assert_eq!(first.tile_status.len(), 24);
    assert!(first.tile_status.values().all(|s| *s == TileStatus::Fetched));
    assert_eq!(log.count(), 1);
    assert_eq!(log.calls()[0], viewport);
    assert_eq!(first.ids(), vec!["A", "B", "C"]);

    let stats = cache.statistics();
    assert_eq!(stats.remote_fetches, 1);
    assert_eq!(stats.cold_entries, 24 + 3);
    assert_eq!(stats.hot_entries, 24 + 3);

    let second = cache.get_airspaces_for_viewport(viewport, 9.0).await;
    assert_eq!(log.count(), 1);
    assert!(second.tile_status.values().all(|s| *s == TileStatus::HotHit));
    assert_eq!(second.ids(), first.ids());
    assert_eq!(cache.statistics().hot_hits, 24);
}

#[tokio::test]
async fn test_empty_tiles_are_cached() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(Vec::new(), clock.clone());
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;

    let viewport = bounds(10.0, 10.0, 11.0, 11.0);
    let first = cache.get_airspaces_for_viewport(viewport, 8.0).await;
    assert!(first.geometries.is_empty());
    assert!(first.is_complete());

    cache.get_airspaces_for_viewport(viewport, 8.0).await;
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone())
        .delayed_when(|_| Some(Duration::from_millis(50)));
    let log = fetcher.log();
    let config = config(&dir).with_remote(
        RemoteConfig::default()
            .with_retries(0, Duration::from_millis(1))
            .with_cancel_superseded(false),
    );
    let cache = open(config, fetcher, &clock).await;

    let viewport = bounds(46.0, 6.5, 46.5, 8.0);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_airspaces_for_viewport(viewport, 9.0).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(log.count(), 1);
    for result in &results {
        assert_eq!(result.ids(), vec!["A", "B", "C"]);
        assert!(result.is_complete());
    }
    let fetched = results
        .iter()
        .flat_map(|r| r.tile_status.values())
        .filter(|s| **s == TileStatus::Fetched)
        .count();
    assert_eq!(fetched, 3);
    assert_eq!(cache.statistics().coalesced_requests, 9);
}

#[tokio::test]
async fn test_identical_requests_survive_supersession() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone())
        .delayed_when(|_| Some(Duration::from_millis(50)));
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;

    let viewport = bounds(46.0, 6.5, 46.5, 8.0);
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_airspaces_for_viewport(viewport, 9.0).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.ids(), vec!["A", "B", "C"]);
        assert!(result.is_complete());
    }
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_superseded_request_keeps_shared_tiles() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone())
        .delayed_when(|_| Some(Duration::from_millis(50)));
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;

    let wide = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 8.0), 9.0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let narrow = cache
        .get_airspaces_for_viewport(bounds(46.0, 7.0, 46.5, 7.5), 9.0)
        .await;
    assert!(narrow.is_complete());
    assert_eq!(narrow.ids(), vec!["B"]);

    let wide = wide.await.unwrap();
    let statuses: Vec<_> = wide.tile_status.values().cloned().collect();
    assert_eq!(
        statuses,
        vec![TileStatus::Cancelled, TileStatus::Fetched, TileStatus::Cancelled]
    );
    assert_eq!(wide.ids(), vec!["B"]);
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_failed_tile_does_not_fail_viewport() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone()).failing_when(|b| {
        (b.west >= 7.5).then(|| FetchError::Permanent("HTTP 403".into()))
    });
    let log = fetcher.log();
    let cache = open(config(&dir), fetcher, &clock).await;

    // Cache the middle cell first so the wider request splits into two regions.
    cache
        .get_airspaces_for_viewport(bounds(46.0, 7.0, 46.5, 7.5), 9.0)
        .await;

    let result = cache
        .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 8.0), 9.0)
        .await;
    assert_eq!(log.count(), 3);
    assert_eq!(result.ids(), vec!["A", "B"]);
    assert!(!result.is_complete());

    let statuses: Vec<_> = result.tile_status.values().cloned().collect();
    assert_eq!(statuses[0], TileStatus::Fetched);
    assert_eq!(statuses[1], TileStatus::HotHit);
    match &statuses[2] {
        TileStatus::Failed(failure) => {
            assert!(!failure.retryable);
            assert_eq!(failure.message, "HTTP 403");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(cache.statistics().fetch_failures, 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let fetcher = MockFetcher::new(swiss_world(), clock.clone()).failing_when(move |_| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (n == 0).then(|| FetchError::Transient("HTTP 503".into()))
    });
    let log = fetcher.log();
    let config = config(&dir).with_remote(RemoteConfig::default().with_retries(2, Duration::from_millis(1)));
    let cache = open(config, fetcher, &clock).await;

    let result = cache
        .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 7.0), 9.0)
        .await;
    assert!(result.is_complete());
    assert_eq!(result.ids(), vec!["A"]);
    assert_eq!(log.count(), 2);
    assert_eq!(cache.statistics().remote_fetches, 1);
}

#[tokio::test]
async fn test_superseded_request_is_cancelled() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let fetcher = MockFetcher::new(swiss_world(), clock.clone())
        .delayed_when(|b| (b.south < 40.0).then(|| Duration::from_secs(30)));
    let cache = open(config(&dir), fetcher, &clock).await;

    let stale = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_airspaces_for_viewport(bounds(30.0, 6.0, 31.0, 7.0), 9.0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fresh = cache
        .get_airspaces_for_viewport(bounds(46.0, 6.5, 46.5, 7.0), 9.0)
        .await;
    assert!(fresh.is_complete());

    let stale = tokio::time::timeout(Duration::from_secs(5), stale)
        .await
        .unwrap()
        .unwrap();
    assert!(!stale.tile_status.is_empty());
    assert!(stale
        .tile_status
        .values()
        .all(|s| *s == TileStatus::Cancelled));
}

#[tokio::test]
async fn test_high_vertex_ring_is_simplified_for_display() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let source = circle("ROUND", 7.25, 46.25, 0.02, 1000);
    let full_area = source.rings[0].area();
    let fetcher = MockFetcher::new(vec![source], clock.clone());
    let cache = open(config(&dir), fetcher, &clock).await;

    let viewport = bounds(46.0, 7.0, 46.5, 7.5);
    let fine = cache.get_airspaces_for_viewport(viewport, 12.0).await;
    let shown = &fine.geometries[0];
    assert!(shown.vertex_count() <= 150, "{} vertices", shown.vertex_count());
    assert!(shown.rings[0].area() >= 0.95 * full_area);

    // The cached source stays at full fidelity.
    let cached = cache.peek_hot_geometry("ROUND").unwrap();
    assert!(cached.is_full_fidelity());
    assert_eq!(cached.vertex_count(), 1001);

    let coarse = cache.get_airspaces_for_viewport(viewport, 5.0).await;
    assert!(coarse.geometries[0].vertex_count() < shown.vertex_count());
}

#[tokio::test]
async fn test_same_class_overlap_is_clipped() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let world = vec![
        square("D1", airspace_cache::AirspaceClass::D, 7.1, 46.1, 0.2),
        square("D2", airspace_cache::AirspaceClass::D, 7.2, 46.1, 0.2),
        square("DUP", airspace_cache::AirspaceClass::D, 7.12, 46.12, 0.1),
    ];
    let fetcher = MockFetcher::new(world, clock.clone());
    let cache = open(config(&dir), fetcher, &clock).await;

    let result = cache
        .get_airspaces_for_viewport(bounds(46.0, 7.0, 46.5, 7.5), 12.0)
        .await;
    // DUP lies entirely inside D1 and is dropped; D2 loses the overlap.
    assert_eq!(result.ids(), vec!["D1", "D2"]);
    let d2 = &result.geometries[1];
    let area = d2.rings[0].area();
    assert!((area - 0.02).abs() < 1e-6, "area {}", area);
}
