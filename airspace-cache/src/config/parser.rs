//! INI parsing: maps `[section] key = value` pairs onto [`AirspaceCacheConfig`].
//!
//! Parsing starts from the defaults and overlays whatever keys are present.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::{AirspaceCacheConfig, FETCH_TIMEOUT_RANGE};
use super::size::parse_size;
use crate::model::BoundingBox;
use crate::tiling::TileGrid;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// One INI section with typed accessors that report errors against it.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).map(str::trim)
    }

    fn parse<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        match self.get(key) {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| invalid(self.name, key, v, reason)),
            None => Ok(None),
        }
    }

    fn size(&self, key: &str) -> Result<Option<u64>, ConfigFileError> {
        match self.get(key) {
            Some(v) => parse_size(v)
                .map(Some)
                .map_err(|_| invalid(self.name, key, v, "expected format like '5MB' or '50KB'")),
            None => Ok(None),
        }
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigFileError> {
        Ok(self
            .parse::<u64>(key, "must be a positive integer (seconds)")?
            .map(Duration::from_secs))
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigFileError> {
        Ok(self
            .parse::<u64>(key, "must be a positive integer (milliseconds)")?
            .map(Duration::from_millis))
    }

    fn ratio(&self, key: &str) -> Result<Option<f64>, ConfigFileError> {
        match self.parse::<f64>(key, "must be a number between 0 and 1")? {
            Some(r) if !(0.0..=1.0).contains(&r) => Err(invalid(
                self.name,
                key,
                &r.to_string(),
                "must be a number between 0 and 1",
            )),
            other => Ok(other),
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

fn section<'a>(ini: &'a Ini, name: &'static str) -> Option<Section<'a>> {
    ini.section(Some(name)).map(|props| Section { name, props })
}

/// Parse an `Ini` object into an [`AirspaceCacheConfig`].
pub(super) fn parse_ini(ini: &Ini) -> Result<AirspaceCacheConfig, ConfigFileError> {
    let mut config = AirspaceCacheConfig::default();

    if let Some(s) = section(ini, "grid") {
        if let Some(step) = s.parse::<f64>("step", "must be a number of degrees")? {
            TileGrid::new(step).map_err(|e| invalid("grid", "step", &step.to_string(), &e.to_string()))?;
            config.grid.step_degrees = step;
        }
    }

    if let Some(s) = section(ini, "hot") {
        if let Some(v) = s.parse("geometry_max_items", "must be a positive integer")? {
            config.hot.geometry_max_items = v;
        }
        if let Some(v) = s.size("geometry_max_bytes")? {
            config.hot.geometry_max_bytes = v;
        }
        if let Some(v) = s.parse("tile_max_items", "must be a positive integer")? {
            config.hot.tile_max_items = v;
        }
        if let Some(v) = s.size("tile_max_bytes")? {
            config.hot.tile_max_bytes = v;
        }
    }

    if let Some(s) = section(ini, "cold") {
        if let Some(v) = s.string("directory") {
            config.cold.directory = expand_tilde(&v);
        }
        if let Some(v) = s.seconds("geometry_ttl")? {
            config.cold.geometry_ttl = v;
        }
        if let Some(v) = s.seconds("tile_ttl")? {
            config.cold.tile_ttl = v;
        }
        if let Some(v) = s.parse::<usize>("lock_stripes", "must be a positive integer")? {
            if v == 0 {
                return Err(invalid("cold", "lock_stripes", "0", "must be at least 1"));
            }
            config.cold.lock_stripes = v;
        }
    }

    if let Some(s) = section(ini, "remote") {
        config.remote.endpoint = s.string("endpoint").or(config.remote.endpoint);
        config.remote.api_key = s.string("api_key").or(config.remote.api_key);
        if let Some(v) = s.seconds("timeout")? {
            let (min, max) = FETCH_TIMEOUT_RANGE;
            if v < min || v > max {
                return Err(invalid(
                    "remote",
                    "timeout",
                    &v.as_secs().to_string(),
                    "must be between 10 and 30 seconds",
                ));
            }
            config.remote.timeout = v;
        }
        if let Some(v) = s.parse("max_retries", "must be a non-negative integer")? {
            config.remote.max_retries = v;
        }
        if let Some(v) = s.millis("retry_base_delay_ms")? {
            config.remote.retry_base_delay = v;
        }
        if let Some(v) = s.millis("retry_max_delay_ms")? {
            config.remote.retry_max_delay = v;
        }
        if let Some(v) = s.get("cancel_superseded") {
            config.remote.cancel_superseded = parse_bool(v);
        }
    }

    if let Some(s) = section(ini, "promotion") {
        if let Some(v) = s.ratio("pressure_ratio")? {
            config.promotion.pressure_ratio = v;
        }
        if let Some(v) = s.size("large_entry_bytes")? {
            config.promotion.large_entry_bytes = v;
        }
        if let Some(v) = s.parse("access_threshold", "must be a non-negative integer")? {
            config.promotion.access_threshold = v;
        }
        if let Some(v) = s.string("primary_area") {
            let area = v.parse::<BoundingBox>().map_err(|e| {
                invalid("promotion", "primary_area", &v, &e.to_string())
            })?;
            config.promotion.primary_area = Some(area);
        }
    }

    if let Some(s) = section(ini, "simplification") {
        let simp = &mut config.simplification;
        if let Some(v) = s.parse("coarse_tolerance", "must be a number of degrees")? {
            simp.coarse_tolerance = v;
        }
        if let Some(v) = s.parse("fine_tolerance", "must be a number of degrees")? {
            simp.fine_tolerance = v;
        }
        if let Some(v) = s.parse("coarse_zoom", "must be a zoom level")? {
            simp.coarse_zoom = v;
        }
        if let Some(v) = s.parse("fine_zoom", "must be a zoom level")? {
            simp.fine_zoom = v;
        }
        if let Some(v) = s.parse("high_altitude_feet", "must be a number of feet")? {
            simp.high_altitude_feet = v;
        }
        if let Some(v) = s.size("memo_max_bytes")? {
            simp.memo_max_bytes = v;
        }
        if simp.fine_tolerance <= 0.0 || simp.coarse_tolerance < simp.fine_tolerance {
            return Err(invalid(
                "simplification",
                "fine_tolerance",
                &simp.fine_tolerance.to_string(),
                "must be positive and not larger than coarse_tolerance",
            ));
        }
        if simp.fine_zoom <= simp.coarse_zoom {
            return Err(invalid(
                "simplification",
                "fine_zoom",
                &simp.fine_zoom.to_string(),
                "must be greater than coarse_zoom",
            ));
        }
    }

    if let Some(s) = section(ini, "clipping") {
        if let Some(v) = s.get("enabled") {
            config.clipping.enabled = parse_bool(v);
        }
    }

    if let Some(s) = section(ini, "maintenance") {
        if let Some(v) = s.seconds("interval")? {
            if v.is_zero() {
                return Err(invalid("maintenance", "interval", "0", "must be at least 1 second"));
            }
            config.maintenance.interval = v;
        }
        if let Some(v) = s.parse::<usize>("batch_size", "must be a positive integer")? {
            config.maintenance.batch_size = v.max(1);
        }
        if let Some(v) = s.parse("prewarm_limit", "must be a non-negative integer")? {
            config.maintenance.prewarm_limit = v;
        }
        if let Some(v) = s.ratio("compaction_threshold")? {
            config.maintenance.compaction_threshold = v;
        }
    }

    Ok(config)
}

/// Parse a boolean value from a config string.
/// Accepts: true/false, yes/no, 1/0, on/off (case-insensitive)
pub(super) fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "true" || v == "1" || v == "yes" || v == "on"
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<AirspaceCacheConfig, ConfigFileError> {
        parse_ini(&Ini::load_from_str(content).unwrap())
    }

    #[test]
    fn test_empty_is_default() {
        assert_eq!(parse("").unwrap(), AirspaceCacheConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
[grid]
step = 0.25

[hot]
geometry_max_items = 200
geometry_max_bytes = 10MB
tile_max_items = 1000
tile_max_bytes = 100KB

[cold]
directory = /var/cache/airspace
geometry_ttl = 3600
tile_ttl = 600
lock_stripes = 16

[remote]
endpoint = https://airspace.example.com/api
api_key = secret
timeout = 30
max_retries = 4
retry_base_delay_ms = 100
cancel_superseded = no

[promotion]
pressure_ratio = 0.8
large_entry_bytes = 64KB
access_threshold = 3
primary_area = 45.0,5.5,48.0,10.5

[simplification]
coarse_tolerance = 0.02
fine_tolerance = 0.0002

[clipping]
enabled = false

[maintenance]
interval = 600
batch_size = 32
prewarm_limit = 10
compaction_threshold = 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.grid.step_degrees, 0.25);
        assert_eq!(config.hot.geometry_max_items, 200);
        assert_eq!(config.hot.geometry_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.hot.tile_max_bytes, 100 * 1024);
        assert_eq!(config.cold.directory, PathBuf::from("/var/cache/airspace"));
        assert_eq!(config.cold.tile_ttl, Duration::from_secs(600));
        assert_eq!(config.cold.lock_stripes, 16);
        assert_eq!(
            config.remote.endpoint.as_deref(),
            Some("https://airspace.example.com/api")
        );
        assert_eq!(config.remote.max_retries, 4);
        assert_eq!(config.remote.retry_base_delay, Duration::from_millis(100));
        assert!(!config.remote.cancel_superseded);
        assert_eq!(config.promotion.access_threshold, 3);
        assert_eq!(
            config.promotion.primary_area,
            Some(BoundingBox::new(45.0, 5.5, 48.0, 10.5).unwrap())
        );
        assert_eq!(config.simplification.fine_tolerance, 0.0002);
        assert!(!config.clipping.enabled);
        assert_eq!(config.maintenance.interval, Duration::from_secs(600));
        assert_eq!(config.maintenance.compaction_threshold, 0.5);
    }

    #[test]
    fn test_timeout_out_of_range() {
        let err = parse("[remote]\ntimeout = 5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref section, ref key, .. }
                if section == "remote" && key == "timeout"
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse("[grid]\nstep = 0\n").is_err());
        assert!(parse("[hot]\ngeometry_max_bytes = lots\n").is_err());
        assert!(parse("[promotion]\npressure_ratio = 1.5\n").is_err());
        assert!(parse("[promotion]\nprimary_area = 1,2,3\n").is_err());
        assert!(parse("[simplification]\nfine_tolerance = 0.5\n").is_err());
        assert!(parse("[maintenance]\ninterval = 0\n").is_err());
        assert!(parse("[cold]\nlock_stripes = 0\n").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool("maybe"));
    }
}
