//! Geographic bounding boxes.

use std::fmt;
use std::str::FromStr;

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;
/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;
/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;
/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Errors constructing or parsing a bounding box.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BoundsError {
    #[error("Invalid latitude: {0} (must be between -90 and 90)")]
    InvalidLatitude(f64),

    #[error("Invalid longitude: {0} (must be between -180 and 180)")]
    InvalidLongitude(f64),

    #[error("South edge {south} is north of north edge {north}")]
    Inverted { south: f64, north: f64 },

    #[error("Invalid bounds '{0}' - expected 'south,west,north,east'")]
    Parse(String),
}

/// A latitude/longitude rectangle in degrees.
///
/// When `west > east` the box crosses the antimeridian and covers
/// `[west, 180] ∪ [-180, east]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Create a validated bounding box.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Result<Self, BoundsError> {
        for lat in [south, north] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(BoundsError::InvalidLatitude(lat));
            }
        }
        for lon in [west, east] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(BoundsError::InvalidLongitude(lon));
            }
        }
        if south > north {
            return Err(BoundsError::Inverted { south, north });
        }
        Ok(Self {
            south,
            west,
            north,
            east,
        })
    }

    /// Smallest box containing every coordinate, or `None` for an empty iterator.
    ///
    /// Coordinates use `x = longitude`, `y = latitude`.
    pub fn from_coords<'a, I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Coord<f64>>,
    {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            south: first.y,
            west: first.x,
            north: first.y,
            east: first.x,
        };
        for c in iter {
            bbox.south = bbox.south.min(c.y);
            bbox.north = bbox.north.max(c.y);
            bbox.west = bbox.west.min(c.x);
            bbox.east = bbox.east.max(c.x);
        }
        Some(bbox)
    }

    /// Returns true if this box wraps across the 180° meridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Returns true if the box has no area.
    pub fn is_degenerate(&self) -> bool {
        self.south == self.north || self.west == self.east
    }

    /// Split into boxes that do not cross the antimeridian.
    pub fn split_antimeridian(&self) -> Vec<BoundingBox> {
        if self.crosses_antimeridian() {
            vec![
                BoundingBox {
                    east: MAX_LON,
                    ..*self
                },
                BoundingBox {
                    west: MIN_LON,
                    ..*self
                },
            ]
        } else {
            vec![*self]
        }
    }

    /// Returns true if the two boxes share at least one point.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.split_antimeridian().iter().any(|a| {
            other.split_antimeridian().iter().any(|b| {
                a.south <= b.north && b.south <= a.north && a.west <= b.east && b.west <= a.east
            })
        })
    }

    /// Returns true if the point lies inside or on the edge of the box.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        let lat_ok = lat >= self.south && lat <= self.north;
        let lon_ok = if self.crosses_antimeridian() {
            lon >= self.west || lon <= self.east
        } else {
            lon >= self.west && lon <= self.east
        };
        lat_ok && lon_ok
    }

    /// Smallest non-wrapping box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            south: self.south.min(other.south),
            west: self.west.min(other.west),
            north: self.north.max(other.north),
            east: self.east.max(other.east),
        }
    }

    /// Latitude extent in degrees.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Longitude extent in degrees, accounting for antimeridian wrap.
    pub fn width(&self) -> f64 {
        if self.crosses_antimeridian() {
            (MAX_LON - self.west) + (self.east - MIN_LON)
        } else {
            self.east - self.west
        }
    }

    /// Convert a non-wrapping box to a `geo::Rect`.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4},{:.4},{:.4},{:.4}",
            self.south, self.west, self.north, self.east
        )
    }
}

impl FromStr for BoundingBox {
    type Err = BoundsError;

    /// Parse `"south,west,north,east"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| BoundsError::Parse(s.to_string()))?;

        match parts.as_slice() {
            [south, west, north, east] => Self::new(*south, *west, *north, *east),
            _ => Err(BoundsError::Parse(s.to_string())),
        }
    }
}
