//! Shared fixtures: a scripted airspace source and a small airspace world.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airspace_cache::config::{AirspaceCacheConfig, RemoteConfig};
use airspace_cache::fetch::{AirspaceFetcher, FetchError, FetchResponse};
use airspace_cache::model::{AirspaceClass, AirspaceGeometry, BoundingBox, Ring, VerticalLimit};
use airspace_cache::time::{Clock, ManualClock};
use airspace_cache::AirspaceCacheManager;
use geo::Coord;
use tempfile::TempDir;

type Rule = Box<dyn Fn(&BoundingBox) -> Option<FetchError> + Send + Sync>;
type Delay = Box<dyn Fn(&BoundingBox) -> Option<Duration> + Send + Sync>;

/// Record of every bounding box requested from a [`MockFetcher`].
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<BoundingBox>>>);

impl CallLog {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<BoundingBox> {
        self.0.lock().unwrap().clone()
    }
}

/// Serves airspaces from a fixed world, filtered by the requested box.
pub struct MockFetcher {
    world: Vec<AirspaceGeometry>,
    log: CallLog,
    clock: Arc<ManualClock>,
    failure: Option<Rule>,
    delay: Option<Delay>,
}

impl MockFetcher {
    pub fn new(world: Vec<AirspaceGeometry>, clock: Arc<ManualClock>) -> Self {
        Self {
            world,
            log: CallLog::default(),
            clock,
            failure: None,
            delay: None,
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn failing_when(
        mut self,
        rule: impl Fn(&BoundingBox) -> Option<FetchError> + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Box::new(rule));
        self
    }

    pub fn delayed_when(
        mut self,
        rule: impl Fn(&BoundingBox) -> Option<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.delay = Some(Box::new(rule));
        self
    }
}

impl AirspaceFetcher for MockFetcher {
    async fn fetch_airspaces(&self, bounds: BoundingBox) -> Result<FetchResponse, FetchError> {
        self.log.0.lock().unwrap().push(bounds);
        let delay = self.delay.as_ref().and_then(|d| d(&bounds));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failure.as_ref().and_then(|f| f(&bounds)) {
            return Err(err);
        }
        let fetched_at = self.clock.now_millis();
        let geometries = self
            .world
            .iter()
            .filter(|g| g.bounding_box().is_some_and(|b| b.intersects(&bounds)))
            .cloned()
            .collect();
        Ok(FetchResponse {
            geometries,
            fetched_at,
        })
    }
}

pub fn square(id: &str, class: AirspaceClass, west: f64, south: f64, size: f64) -> AirspaceGeometry {
    AirspaceGeometry::new(
        id,
        format!("{} airspace", id),
        class,
        VerticalLimit::ground(),
        VerticalLimit::feet_msl(4500.0),
        vec![Ring::from_lon_lat(&[
            (west, south),
            (west + size, south),
            (west + size, south + size),
            (west, south + size),
        ])],
        0,
    )
}

pub fn circle(id: &str, lon: f64, lat: f64, radius: f64, vertices: usize) -> AirspaceGeometry {
    let points = (0..vertices)
        .map(|i| {
            let a = 2.0 * PI * i as f64 / vertices as f64;
            Coord {
                x: lon + radius * a.cos(),
                y: lat + radius * a.sin(),
            }
        })
        .collect();
    AirspaceGeometry::new(
        id,
        format!("{} circle", id),
        AirspaceClass::Ctr,
        VerticalLimit::ground(),
        VerticalLimit::flight_level(65),
        vec![Ring::new(points)],
        0,
    )
}

/// Three non-overlapping airspaces in the row of tiles at 46.0-46.5 N,
/// one in each of the cells starting at 6.5, 7.0 and 7.5 E.
pub fn swiss_world() -> Vec<AirspaceGeometry> {
    vec![
        square("A", AirspaceClass::D, 6.6, 46.1, 0.3),
        square("B", AirspaceClass::C, 7.1, 46.1, 0.3),
        square("C", AirspaceClass::Ctr, 7.6, 46.1, 0.3),
    ]
}

pub fn bounds(south: f64, west: f64, north: f64, east: f64) -> BoundingBox {
    BoundingBox::new(south, west, north, east).unwrap()
}

pub fn config(dir: &TempDir) -> AirspaceCacheConfig {
    AirspaceCacheConfig::new(dir.path())
        .with_remote(RemoteConfig::default().with_retries(0, Duration::from_millis(1)))
}

pub async fn open(
    config: AirspaceCacheConfig,
    fetcher: MockFetcher,
    clock: &Arc<ManualClock>,
) -> AirspaceCacheManager<MockFetcher> {
    let clock: Arc<dyn Clock> = clock.clone();
    AirspaceCacheManager::open_with_clock(config, fetcher, clock)
        .await
        .unwrap()
}
