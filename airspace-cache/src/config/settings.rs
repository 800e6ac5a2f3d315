//! Typed configuration for every cache component.
//!
//! Each struct maps to one `[section]` of the INI config file. Defaults are
//! design values, not load-tested constants; all of them can be overridden.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::BoundingBox;
use crate::tiling::DEFAULT_STEP_DEGREES;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

/// Default hot-tier geometry entry limit.
pub const DEFAULT_HOT_GEOMETRY_ITEMS: usize = 100;
/// Default hot-tier geometry byte budget.
pub const DEFAULT_HOT_GEOMETRY_BYTES: u64 = 5 * MB;
/// Default hot-tier tile record limit.
pub const DEFAULT_HOT_TILE_ITEMS: usize = 500;
/// Default hot-tier tile record byte budget.
pub const DEFAULT_HOT_TILE_BYTES: u64 = 50 * KB;

/// Cold-tier geometry time-to-live.
pub const DEFAULT_GEOMETRY_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Cold-tier tile mapping time-to-live.
pub const DEFAULT_TILE_TTL: Duration = Duration::from_secs(24 * 3600);
/// Number of striped per-key locks in the cold tier.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// Per-attempt remote fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Accepted range for the remote fetch timeout.
pub const FETCH_TIMEOUT_RANGE: (Duration, Duration) =
    (Duration::from_secs(10), Duration::from_secs(30));
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_PRESSURE_RATIO: f64 = 0.9;
pub const DEFAULT_LARGE_ENTRY_BYTES: u64 = 100 * KB;
pub const DEFAULT_ACCESS_THRESHOLD: u64 = 5;

/// Coarsest tolerance in degrees (~1 km).
pub const DEFAULT_COARSE_TOLERANCE: f64 = 0.01;
/// Finest tolerance in degrees (~10 m).
pub const DEFAULT_FINE_TOLERANCE: f64 = 0.0001;
pub const DEFAULT_COARSE_ZOOM: f64 = 6.0;
pub const DEFAULT_FINE_ZOOM: f64 = 12.0;
/// Airspaces with a lower limit above this always use the coarsest tolerance.
pub const DEFAULT_HIGH_ALTITUDE_FEET: f64 = 10_000.0;
pub const DEFAULT_SIMPLIFIED_MEMO_BYTES: u64 = 16 * MB;

pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAINTENANCE_BATCH: usize = 256;
pub const DEFAULT_PREWARM_LIMIT: usize = 50;
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.2;

/// Default cold-tier directory (~/.airspace-cache/cold).
pub fn default_cache_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".airspace-cache")
        .join("cold")
}

/// Tiling grid settings (`[grid]`).
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// Cell size in degrees.
    pub step_degrees: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_degrees: DEFAULT_STEP_DEGREES,
        }
    }
}

/// Hot tier budgets (`[hot]`).
#[derive(Debug, Clone, PartialEq)]
pub struct HotCacheConfig {
    pub geometry_max_items: usize,
    pub geometry_max_bytes: u64,
    pub tile_max_items: usize,
    pub tile_max_bytes: u64,
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            geometry_max_items: DEFAULT_HOT_GEOMETRY_ITEMS,
            geometry_max_bytes: DEFAULT_HOT_GEOMETRY_BYTES,
            tile_max_items: DEFAULT_HOT_TILE_ITEMS,
            tile_max_bytes: DEFAULT_HOT_TILE_BYTES,
        }
    }
}

impl HotCacheConfig {
    pub fn with_geometry_limits(mut self, max_items: usize, max_bytes: u64) -> Self {
        self.geometry_max_items = max_items;
        self.geometry_max_bytes = max_bytes;
        self
    }

    pub fn with_tile_limits(mut self, max_items: usize, max_bytes: u64) -> Self {
        self.tile_max_items = max_items;
        self.tile_max_bytes = max_bytes;
        self
    }
}

/// Cold tier settings (`[cold]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ColdCacheConfig {
    /// Root directory of the persistent store.
    pub directory: PathBuf,
    pub geometry_ttl: Duration,
    pub tile_ttl: Duration,
    pub lock_stripes: usize,
}

impl ColdCacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            geometry_ttl: DEFAULT_GEOMETRY_TTL,
            tile_ttl: DEFAULT_TILE_TTL,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }

    pub fn with_ttls(mut self, geometry_ttl: Duration, tile_ttl: Duration) -> Self {
        self.geometry_ttl = geometry_ttl;
        self.tile_ttl = tile_ttl;
        self
    }
}

impl Default for ColdCacheConfig {
    fn default() -> Self {
        Self::new(default_cache_directory())
    }
}

/// Remote fetch behaviour (`[remote]`).
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Airspace service endpoint used by the HTTP fetcher.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// A new viewport request cancels waiting on the previous one.
    pub cancel_superseded: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            cancel_superseded: true,
        }
    }
}

impl RemoteConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn with_cancel_superseded(mut self, enabled: bool) -> Self {
        self.cancel_superseded = enabled;
        self
    }
}

/// Promotion heuristic thresholds (`[promotion]`).
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionConfig {
    /// Fraction of the hot byte budget above which large entries are refused.
    pub pressure_ratio: f64,
    pub large_entry_bytes: u64,
    /// Cold access count above which an entry is promoted.
    pub access_threshold: u64,
    /// Entries intersecting this area are always promoted.
    pub primary_area: Option<BoundingBox>,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            pressure_ratio: DEFAULT_PRESSURE_RATIO,
            large_entry_bytes: DEFAULT_LARGE_ENTRY_BYTES,
            access_threshold: DEFAULT_ACCESS_THRESHOLD,
            primary_area: None,
        }
    }
}

impl PromotionConfig {
    pub fn with_primary_area(mut self, area: BoundingBox) -> Self {
        self.primary_area = Some(area);
        self
    }
}

/// Zoom/altitude adaptive simplification (`[simplification]`).
#[derive(Debug, Clone, PartialEq)]
pub struct SimplificationConfig {
    pub coarse_tolerance: f64,
    pub fine_tolerance: f64,
    /// At or below this zoom the coarse tolerance applies.
    pub coarse_zoom: f64,
    /// At or above this zoom the fine tolerance applies.
    pub fine_zoom: f64,
    pub high_altitude_feet: f64,
    /// Byte budget of the simplified-result memo.
    pub memo_max_bytes: u64,
}

impl Default for SimplificationConfig {
    fn default() -> Self {
        Self {
            coarse_tolerance: DEFAULT_COARSE_TOLERANCE,
            fine_tolerance: DEFAULT_FINE_TOLERANCE,
            coarse_zoom: DEFAULT_COARSE_ZOOM,
            fine_zoom: DEFAULT_FINE_ZOOM,
            high_altitude_feet: DEFAULT_HIGH_ALTITUDE_FEET,
            memo_max_bytes: DEFAULT_SIMPLIFIED_MEMO_BYTES,
        }
    }
}

/// Overlap clipping (`[clipping]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClippingConfig {
    pub enabled: bool,
}

impl Default for ClippingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Background maintenance (`[maintenance]`).
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    /// Entries processed per sweep batch before yielding.
    pub batch_size: usize,
    /// Maximum geometries pre-populated into the hot tier per cycle.
    pub prewarm_limit: usize,
    /// Journal fragmentation ratio that triggers compaction.
    pub compaction_threshold: f64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MAINTENANCE_INTERVAL,
            batch_size: DEFAULT_MAINTENANCE_BATCH,
            prewarm_limit: DEFAULT_PREWARM_LIMIT,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

/// Complete configuration for [`crate::AirspaceCacheManager`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirspaceCacheConfig {
    pub grid: GridConfig,
    pub hot: HotCacheConfig,
    pub cold: ColdCacheConfig,
    pub remote: RemoteConfig,
    pub promotion: PromotionConfig,
    pub simplification: SimplificationConfig,
    pub clipping: ClippingConfig,
    pub maintenance: MaintenanceConfig,
}

impl AirspaceCacheConfig {
    /// Defaults with the cold tier rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cold: ColdCacheConfig::new(cache_dir),
            ..Self::default()
        }
    }

    pub fn with_grid_step(mut self, step_degrees: f64) -> Self {
        self.grid.step_degrees = step_degrees;
        self
    }

    pub fn with_hot(mut self, hot: HotCacheConfig) -> Self {
        self.hot = hot;
        self
    }

    pub fn with_cold(mut self, cold: ColdCacheConfig) -> Self {
        self.cold = cold;
        self
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_promotion(mut self, promotion: PromotionConfig) -> Self {
        self.promotion = promotion;
        self
    }

    pub fn with_simplification(mut self, simplification: SimplificationConfig) -> Self {
        self.simplification = simplification;
        self
    }

    pub fn with_clipping(mut self, enabled: bool) -> Self {
        self.clipping.enabled = enabled;
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }
}
