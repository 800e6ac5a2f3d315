//! Airspace geometry records.

use std::fmt;

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::bounds::BoundingBox;

/// Feet per metre.
const FEET_PER_METRE: f64 = 3.28084;

/// A closed polygon ring in `(lon, lat)` degrees.
///
/// The stored sequence always ends with a copy of its first vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    points: Vec<Coord<f64>>,
}

impl Ring {
    /// Create a ring, appending the closure vertex if it is missing.
    pub fn new(mut points: Vec<Coord<f64>>) -> Self {
        if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) {
            if points.len() == 1 || first != last {
                points.push(first);
            }
        }
        Self { points }
    }

    /// Create a ring from `(lon, lat)` pairs.
    pub fn from_lon_lat(pairs: &[(f64, f64)]) -> Self {
        Self::new(pairs.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    /// All vertices including the closure vertex.
    pub fn points(&self) -> &[Coord<f64>] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Coord<f64>> {
        self.points
    }

    /// Number of stored vertices including the closure vertex.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.points.len() >= 2 && self.points.first() == self.points.last()
    }

    /// Number of distinct vertices, ignoring the closure and consecutive repeats.
    pub fn distinct_len(&self) -> usize {
        let open = match self.points.split_last() {
            Some((_, rest)) if self.is_closed() => rest,
            _ => &self.points[..],
        };
        let mut count = 0;
        let mut prev: Option<&Coord<f64>> = None;
        for p in open {
            if prev != Some(p) {
                count += 1;
            }
            prev = Some(p);
        }
        if count > 1 && open.first() == open.last() {
            count -= 1;
        }
        count
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_coords(&self.points)
    }

    /// Unsigned planar area in square degrees.
    pub fn area(&self) -> f64 {
        let twice: f64 = self
            .points
            .windows(2)
            .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
            .sum();
        (twice / 2.0).abs()
    }

    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(self.points.clone())
    }
}

/// Unit of a vertical limit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AltitudeUnit {
    #[serde(alias = "FT")]
    Feet,
    #[serde(alias = "M")]
    Meters,
    #[serde(alias = "FL")]
    FlightLevel,
}

/// Datum a vertical limit is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AltitudeReference {
    /// Above ground level.
    Gnd,
    /// Above mean sea level.
    Msl,
    /// Standard pressure (flight levels).
    Std,
}

/// Lower or upper vertical bound of an airspace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerticalLimit {
    pub value: f64,
    pub unit: AltitudeUnit,
    pub reference: AltitudeReference,
}

impl VerticalLimit {
    pub fn ground() -> Self {
        Self {
            value: 0.0,
            unit: AltitudeUnit::Feet,
            reference: AltitudeReference::Gnd,
        }
    }

    pub fn feet_msl(value: f64) -> Self {
        Self {
            value,
            unit: AltitudeUnit::Feet,
            reference: AltitudeReference::Msl,
        }
    }

    pub fn flight_level(level: u32) -> Self {
        Self {
            value: f64::from(level),
            unit: AltitudeUnit::FlightLevel,
            reference: AltitudeReference::Std,
        }
    }

    /// Value converted to feet, ignoring the reference datum.
    pub fn to_feet(&self) -> f64 {
        match self.unit {
            AltitudeUnit::Feet => self.value,
            AltitudeUnit::Meters => self.value * FEET_PER_METRE,
            AltitudeUnit::FlightLevel => self.value * 100.0,
        }
    }
}

impl fmt::Display for VerticalLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.unit, self.reference) {
            (AltitudeUnit::FlightLevel, _) => write!(f, "FL{:.0}", self.value),
            (_, AltitudeReference::Gnd) if self.value == 0.0 => write!(f, "GND"),
            (AltitudeUnit::Feet, r) => write!(f, "{:.0}ft {:?}", self.value, r),
            (AltitudeUnit::Meters, r) => write!(f, "{:.0}m {:?}", self.value, r),
        }
    }
}

/// Airspace classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AirspaceClass {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    Ctr,
    Tma,
    Restricted,
    Danger,
    Prohibited,
    Tmz,
    Rmz,
    Glider,
    #[serde(other)]
    Other,
}

impl AirspaceClass {
    /// Render priority used to order clipping; higher values are drawn on top.
    pub fn priority(&self) -> u8 {
        match self {
            AirspaceClass::Prohibited => 100,
            AirspaceClass::Restricted => 90,
            AirspaceClass::Danger => 80,
            AirspaceClass::Ctr => 70,
            AirspaceClass::A => 65,
            AirspaceClass::B => 60,
            AirspaceClass::C => 55,
            AirspaceClass::Tma => 50,
            AirspaceClass::D => 45,
            AirspaceClass::E => 40,
            AirspaceClass::Tmz => 35,
            AirspaceClass::Rmz => 30,
            AirspaceClass::F => 25,
            AirspaceClass::Glider => 20,
            AirspaceClass::G => 10,
            AirspaceClass::Other => 0,
        }
    }
}

/// Fields of a geometry that make up its cached content.
#[derive(Serialize)]
struct GeometryContent<'a> {
    id: &'a str,
    name: &'a str,
    class: AirspaceClass,
    lower: &'a VerticalLimit,
    upper: &'a VerticalLimit,
    rings: &'a [Ring],
    tolerance: f64,
}

/// A single airspace: identity, classification, vertical limits and outline.
///
/// `rings[0]` is the exterior ring; any further rings are holes. A
/// `tolerance` of zero marks full-fidelity geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirspaceGeometry {
    pub id: String,
    pub name: String,
    pub class: AirspaceClass,
    pub lower: VerticalLimit,
    pub upper: VerticalLimit,
    pub rings: Vec<Ring>,
    /// Simplification tolerance applied to `rings`, in degrees.
    pub tolerance: f64,
    /// Encoded content size in bytes.
    pub size_bytes: u64,
    /// When the geometry was fetched from the remote source (epoch millis).
    pub fetched_at: i64,
    /// Last read from any tier (epoch millis).
    pub last_accessed: i64,
    pub access_count: u64,
}

impl AirspaceGeometry {
    /// Create a full-fidelity geometry fetched at `fetched_at`.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        class: AirspaceClass,
        lower: VerticalLimit,
        upper: VerticalLimit,
        rings: Vec<Ring>,
        fetched_at: i64,
    ) -> Self {
        let mut geometry = Self {
            id: id.into(),
            name: name.into(),
            class,
            lower,
            upper,
            rings,
            tolerance: 0.0,
            size_bytes: 0,
            fetched_at,
            last_accessed: fetched_at,
            access_count: 0,
        };
        geometry.size_bytes = geometry.content_size();
        geometry
    }

    fn content(&self) -> GeometryContent<'_> {
        GeometryContent {
            id: &self.id,
            name: &self.name,
            class: self.class,
            lower: &self.lower,
            upper: &self.upper,
            rings: &self.rings,
            tolerance: self.tolerance,
        }
    }

    fn content_size(&self) -> u64 {
        bincode::serialized_size(&self.content()).unwrap_or(0)
    }

    /// SHA-256 of the encoded content, excluding access bookkeeping.
    pub fn content_digest(&self) -> String {
        let encoded = bincode::serialize(&self.content()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }

    /// Derive a copy with replaced rings at the given tolerance.
    pub fn with_rings(&self, rings: Vec<Ring>, tolerance: f64) -> Self {
        let mut derived = Self {
            rings,
            tolerance,
            ..self.clone()
        };
        derived.size_bytes = derived.content_size();
        derived
    }

    pub fn is_full_fidelity(&self) -> bool {
        self.tolerance == 0.0
    }

    /// Bounding box of the exterior ring.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.rings.first().and_then(Ring::bounding_box)
    }

    /// Total stored vertices across all rings.
    pub fn vertex_count(&self) -> usize {
        self.rings.iter().map(Ring::len).sum()
    }

    /// Returns true if the vertical bands of the two airspaces overlap.
    pub fn vertically_overlaps(&self, other: &AirspaceGeometry) -> bool {
        self.lower.to_feet() < other.upper.to_feet() && other.lower.to_feet() < self.upper.to_feet()
    }

    /// Convert to a `geo::Polygon` (exterior + holes).
    pub fn to_polygon(&self) -> Option<Polygon<f64>> {
        let (exterior, holes) = self.rings.split_first()?;
        Some(Polygon::new(
            exterior.to_line_string(),
            holes.iter().map(Ring::to_line_string).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Ring {
        Ring::from_lon_lat(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])
    }

    fn sample(id: &str) -> AirspaceGeometry {
        AirspaceGeometry::new(
            id,
            "Test CTR",
            AirspaceClass::Ctr,
            VerticalLimit::ground(),
            VerticalLimit::feet_msl(4500.0),
            vec![square()],
            1_000,
        )
    }

    #[test]
    fn test_ring_closes_open_input() {
        let ring = square();
        assert!(ring.is_closed());
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.distinct_len(), 4);
    }

    #[test]
    fn test_ring_keeps_closed_input() {
        let ring = Ring::from_lon_lat(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.distinct_len(), 3);
    }

    #[test]
    fn test_ring_distinct_len_skips_repeats() {
        let ring = Ring::from_lon_lat(&[(0.0, 0.0), (0.0, 0.0), (1.0, 0.0), (1.0, 0.0)]);
        assert_eq!(ring.distinct_len(), 2);
    }

    #[test]
    fn test_ring_area() {
        assert!((square().area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_vertical_limit_to_feet() {
        assert_eq!(VerticalLimit::flight_level(95).to_feet(), 9500.0);
        let metres = VerticalLimit {
            value: 1000.0,
            unit: AltitudeUnit::Meters,
            reference: AltitudeReference::Msl,
        };
        assert!((metres.to_feet() - 3280.84).abs() < 1e-6);
    }

    #[test]
    fn test_vertical_limit_display() {
        assert_eq!(VerticalLimit::ground().to_string(), "GND");
        assert_eq!(VerticalLimit::flight_level(65).to_string(), "FL65");
        assert_eq!(VerticalLimit::feet_msl(4500.0).to_string(), "4500ft Msl");
    }

    #[test]
    fn test_geometry_size_and_digest() {
        let a = sample("a");
        assert!(a.size_bytes > 0);

        let mut touched = a.clone();
        touched.access_count = 42;
        touched.last_accessed = 99_999;
        assert_eq!(a.content_digest(), touched.content_digest());

        let b = sample("b");
        assert_ne!(a.content_digest(), b.content_digest());
    }

    #[test]
    fn test_with_rings_updates_tolerance() {
        let a = sample("a");
        let derived = a.with_rings(vec![square()], 0.01);
        assert!(!derived.is_full_fidelity());
        assert_eq!(derived.id, "a");
        assert_ne!(a.content_digest(), derived.content_digest());
    }

    #[test]
    fn test_vertical_overlap() {
        let low = sample("low");
        let mut high = sample("high");
        high.lower = VerticalLimit::flight_level(65);
        high.upper = VerticalLimit::flight_level(195);
        assert!(!low.vertically_overlaps(&high));
        assert!(low.vertically_overlaps(&sample("other")));
    }

    #[test]
    fn test_class_deserializes_unknown_as_other() {
        let class: AirspaceClass = serde_json::from_str("\"WAVE\"").unwrap();
        assert_eq!(class, AirspaceClass::Other);
        let class: AirspaceClass = serde_json::from_str("\"CTR\"").unwrap();
        assert_eq!(class, AirspaceClass::Ctr);
    }
}
