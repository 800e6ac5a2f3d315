//! Viewport tiling.
//!
//! Maps a viewport onto a fixed latitude/longitude grid. Tile keys are the
//! spatial cache key for both tiers, so the mapping must be deterministic:
//! overlapping viewports always produce the same keys for the shared area.
//!
//! Arithmetic runs on integer micro-degrees so that cell boundaries do not
//! depend on floating-point rounding of the step.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{BoundingBox, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Micro-degrees per degree.
const MICRO: f64 = 1_000_000.0;

/// Default grid step in degrees.
pub const DEFAULT_STEP_DEGREES: f64 = 0.5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TileGridError {
    #[error("Invalid grid step {0}: must be greater than 0.000001 and at most 90 degrees")]
    InvalidStep(f64),
}

/// Identity of one grid cell.
///
/// The step is part of the key so keys from different grids never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub step_micro: i64,
    pub lat_index: i64,
    pub lon_index: i64,
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t{}:{}:{}",
            self.step_micro, self.lat_index, self.lon_index
        )
    }
}

impl TileKey {
    /// Returns true if `other` shares an edge with this tile.
    pub fn is_adjacent(&self, other: &TileKey) -> bool {
        self.step_micro == other.step_micro
            && (self.lat_index - other.lat_index).abs() + (self.lon_index - other.lon_index).abs()
                == 1
    }
}

/// Cached mapping from a tile to the airspaces that intersect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub key: TileKey,
    pub airspace_ids: BTreeSet<String>,
    pub fetched_at: i64,
    /// No airspace intersects the tile; cached to avoid repeat remote misses.
    pub is_empty: bool,
}

impl TileMetadata {
    pub fn new(key: TileKey, airspace_ids: BTreeSet<String>, fetched_at: i64) -> Self {
        let is_empty = airspace_ids.is_empty();
        Self {
            key,
            airspace_ids,
            fetched_at,
            is_empty,
        }
    }

    /// Approximate in-memory footprint.
    pub fn size_bytes(&self) -> u64 {
        let ids: usize = self.airspace_ids.iter().map(|id| id.len() + 24).sum();
        (std::mem::size_of::<Self>() + ids) as u64
    }
}

/// Fixed square grid over latitude/longitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    step_micro: i64,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self {
            step_micro: (DEFAULT_STEP_DEGREES * MICRO) as i64,
        }
    }
}

fn to_micro(degrees: f64) -> i64 {
    (degrees * MICRO).round() as i64
}

impl TileGrid {
    pub fn new(step_degrees: f64) -> Result<Self, TileGridError> {
        let step_micro = to_micro(step_degrees);
        if !step_degrees.is_finite() || step_micro < 1 || step_degrees > 90.0 {
            return Err(TileGridError::InvalidStep(step_degrees));
        }
        Ok(Self { step_micro })
    }

    pub fn step_degrees(&self) -> f64 {
        self.step_micro as f64 / MICRO
    }

    /// Tile index range `[lo, hi]` covering `[min, max]` on one axis.
    ///
    /// Cells are half-open, so a `max` lying exactly on a boundary does not
    /// pull in the next cell. A zero-width range yields one index.
    fn index_range(&self, min: f64, max: f64, limit_lo: f64, limit_hi: f64) -> (i64, i64) {
        let min_micro = to_micro(min);
        let max_micro = to_micro(max);
        let first = to_micro(limit_lo).div_euclid(self.step_micro);
        let last = (to_micro(limit_hi) - 1).div_euclid(self.step_micro);

        let lo = min_micro.div_euclid(self.step_micro).clamp(first, last);
        let hi = if max_micro > min_micro {
            (max_micro - 1).div_euclid(self.step_micro)
        } else {
            lo
        };
        (lo, hi.clamp(lo, last))
    }

    /// Canonical tile keys covering `bounds`, ordered row-major.
    ///
    /// A viewport crossing the antimeridian is covered as two ranges.
    pub fn tiles_for(&self, bounds: &BoundingBox) -> BTreeSet<TileKey> {
        let mut keys = BTreeSet::new();
        for part in bounds.split_antimeridian() {
            let (lat_lo, lat_hi) = self.index_range(part.south, part.north, MIN_LAT, MAX_LAT);
            let (lon_lo, lon_hi) = self.index_range(part.west, part.east, MIN_LON, MAX_LON);
            for lat_index in lat_lo..=lat_hi {
                for lon_index in lon_lo..=lon_hi {
                    keys.insert(TileKey {
                        step_micro: self.step_micro,
                        lat_index,
                        lon_index,
                    });
                }
            }
        }
        keys
    }

    /// Geographic extent of a tile, clamped to valid coordinates.
    pub fn tile_bounds(&self, key: &TileKey) -> BoundingBox {
        let step = key.step_micro as f64 / MICRO;
        BoundingBox {
            south: (key.lat_index as f64 * step).max(MIN_LAT),
            west: (key.lon_index as f64 * step).max(MIN_LON),
            north: ((key.lat_index + 1) as f64 * step).min(MAX_LAT),
            east: ((key.lon_index + 1) as f64 * step).min(MAX_LON),
        }
    }

    /// Bounding box of a set of tiles.
    pub fn region_bounds<'a, I>(&self, keys: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a TileKey>,
    {
        keys.into_iter()
            .map(|k| self.tile_bounds(k))
            .reduce(|acc, b| acc.union(&b))
    }
}

/// Group tiles into 4-connected regions.
///
/// Regions are returned in order of their smallest key.
pub fn connected_regions(keys: &BTreeSet<TileKey>) -> Vec<BTreeSet<TileKey>> {
    let mut remaining = keys.clone();
    let mut regions = Vec::new();

    while let Some(seed) = remaining.pop_first() {
        let mut region = BTreeSet::from([seed]);
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            let neighbours: Vec<TileKey> = [(1, 0), (-1, 0), (0, 1), (0, -1)]
                .iter()
                .map(|(dlat, dlon)| TileKey {
                    lat_index: current.lat_index + dlat,
                    lon_index: current.lon_index + dlon,
                    ..current
                })
                .filter(|k| remaining.contains(k))
                .collect();
            for n in neighbours {
                remaining.remove(&n);
                region.insert(n);
                queue.push_back(n);
            }
        }
        regions.push(region);
    }
    regions
}
