//! Boolean polygon clipping on a fixed-point grid.
//!
//! Inputs are snapped to integer micro-degrees before any boolean
//! operation, which keeps near-coincident edges from adjacent airspaces
//! exactly coincident. Rings that collapse below three points after
//! snapping are dropped instead of being handed to the overlay.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use geo::{Area, BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{AirspaceGeometry, Ring};

/// Fixed-point scale: coordinates become micro-degrees.
pub const FIXED_SCALE: f64 = 1_000_000.0;

/// A polygon as rings: exterior first, then holes.
pub type PolygonRings = Vec<Ring>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClipError {
    #[error("Clipping failed: {0}")]
    Topology(String),
}

/// Boolean operation applied between subjects and clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipRule {
    Union,
    Difference,
    Intersection,
}

/// Counters of boolean operations run and skipped by bounding-box rejection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClipStats {
    pub operations: u64,
    pub skipped: u64,
}

/// Integer bounding box in micro-degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedBounds {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

impl FixedBounds {
    fn of(points: &[(i64, i64)]) -> Option<Self> {
        let (&(x, y), rest) = points.split_first()?;
        Some(rest.iter().fold(
            Self {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            },
            |b, &(x, y)| Self {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        ))
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Strict overlap: boxes that only touch share no area.
    fn overlaps(&self, other: &Self) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }
}

/// A polygon snapped to the fixed-point grid.
struct FixedPolygon {
    polygon: Polygon<f64>,
    bounds: FixedBounds,
}

/// Snap a ring to micro-degrees, dropping repeats and the closure.
fn snap_ring(ring: &Ring) -> Result<Vec<(i64, i64)>, ClipError> {
    let mut out: Vec<(i64, i64)> = Vec::with_capacity(ring.len());
    for p in ring.points() {
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(ClipError::Topology(format!(
                "non-finite coordinate ({}, {})",
                p.x, p.y
            )));
        }
        let q = (
            (p.x * FIXED_SCALE).round() as i64,
            (p.y * FIXED_SCALE).round() as i64,
        );
        if out.last() != Some(&q) {
            out.push(q);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    Ok(out)
}

fn fixed_line(points: &[(i64, i64)]) -> LineString<f64> {
    points
        .iter()
        .map(|&(x, y)| Coord {
            x: x as f64,
            y: y as f64,
        })
        .collect()
}

/// Snap a polygon; `None` if its exterior collapses.
fn snap_polygon(rings: &[Ring]) -> Result<Option<FixedPolygon>, ClipError> {
    let Some((exterior, holes)) = rings.split_first() else {
        return Ok(None);
    };
    let outer = snap_ring(exterior)?;
    if outer.len() < 3 {
        return Ok(None);
    }
    let Some(bounds) = FixedBounds::of(&outer) else {
        return Ok(None);
    };
    let mut interiors = Vec::with_capacity(holes.len());
    for hole in holes {
        let snapped = snap_ring(hole)?;
        if snapped.len() >= 3 {
            interiors.push(fixed_line(&snapped));
        }
    }
    Ok(Some(FixedPolygon {
        polygon: Polygon::new(fixed_line(&outer), interiors),
        bounds,
    }))
}

/// Convert an overlay ring back to degrees, `None` if it collapses.
fn unsnap_ring(line: &LineString<f64>) -> Option<Ring> {
    let mut out: Vec<(i64, i64)> = Vec::with_capacity(line.0.len());
    for c in line.coords() {
        let q = (c.x.round() as i64, c.y.round() as i64);
        if out.last() != Some(&q) {
            out.push(q);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    if out.len() < 3 {
        return None;
    }
    Some(Ring::new(
        out.into_iter()
            .map(|(x, y)| Coord {
                x: x as f64 / FIXED_SCALE,
                y: y as f64 / FIXED_SCALE,
            })
            .collect(),
    ))
}

fn unsnap(result: &MultiPolygon<f64>) -> Vec<PolygonRings> {
    result
        .iter()
        .filter_map(|polygon| {
            let exterior = unsnap_ring(polygon.exterior())?;
            let mut rings = vec![exterior];
            rings.extend(polygon.interiors().iter().filter_map(unsnap_ring));
            Some(rings)
        })
        .collect()
}

fn union_all(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut iter = polygons.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon::new(Vec::new());
    };
    iter.fold(MultiPolygon::new(vec![first]), |acc, p| {
        acc.union(&MultiPolygon::new(vec![p]))
    })
}

/// Boolean operations between airspace outlines.
#[derive(Debug, Default)]
pub struct ClippingEngine {
    operations: AtomicU64,
    skipped: AtomicU64,
}

impl ClippingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ClipStats {
        ClipStats {
            operations: self.operations.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Apply `rule` between the union of `subjects` and the union of `clips`.
    ///
    /// Clips whose bounding box does not overlap the subjects are ignored;
    /// when none remain the boolean operation is skipped entirely. Empty
    /// input yields empty output. Overlay panics on pathological input are
    /// reported as [`ClipError::Topology`].
    pub fn clip(
        &self,
        subjects: &[PolygonRings],
        clips: &[PolygonRings],
        rule: ClipRule,
    ) -> Result<Vec<PolygonRings>, ClipError> {
        let subjects = subjects
            .iter()
            .filter_map(|rings| snap_polygon(rings).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        let clips = clips
            .iter()
            .filter_map(|rings| snap_polygon(rings).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let subject_bounds = subjects
            .iter()
            .map(|s| s.bounds)
            .reduce(FixedBounds::merge);
        let (relevant, disjoint): (Vec<FixedPolygon>, Vec<FixedPolygon>) = clips
            .into_iter()
            .partition(|c| subject_bounds.is_some_and(|sb| c.bounds.overlaps(&sb)));

        // Disjoint clips only contribute to a union, and do so unchanged.
        let mut untouched = match rule {
            ClipRule::Union => unsnap(&MultiPolygon::new(
                disjoint.into_iter().map(|c| c.polygon).collect(),
            )),
            ClipRule::Difference | ClipRule::Intersection => Vec::new(),
        };

        if relevant.is_empty() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            if rule == ClipRule::Intersection {
                return Ok(Vec::new());
            }
            let mut passthrough = unsnap(&MultiPolygon::new(
                subjects.into_iter().map(|s| s.polygon).collect(),
            ));
            passthrough.append(&mut untouched);
            return Ok(passthrough);
        }

        self.operations.fetch_add(1, Ordering::Relaxed);
        let subject_polys: Vec<Polygon<f64>> = subjects.into_iter().map(|s| s.polygon).collect();
        let clip_polys: Vec<Polygon<f64>> = relevant.into_iter().map(|c| c.polygon).collect();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let subject = union_all(subject_polys);
            let clip = union_all(clip_polys);
            match rule {
                ClipRule::Union => subject.union(&clip),
                ClipRule::Difference => subject.difference(&clip),
                ClipRule::Intersection => subject.intersection(&clip),
            }
        }))
        .map_err(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "overlay panicked".to_string());
            ClipError::Topology(reason)
        })?;

        let mut clipped = unsnap(&result);
        clipped.append(&mut untouched);
        Ok(clipped)
    }

    /// Remove overlap between co-located airspaces of the same class.
    ///
    /// Geometries are processed in `(priority, id)` order. Each one loses
    /// the area of earlier geometries of the same class with an overlapping
    /// vertical band. The area removed is that of the earlier geometries'
    /// original outlines, not of what remained of them after their own
    /// clip. Fully covered geometries are omitted. A geometry whose clip
    /// fails, or would split into several parts, is kept unclipped.
    pub fn clip_overlaps(
        &self,
        mut geometries: Vec<Arc<AirspaceGeometry>>,
    ) -> Vec<Arc<AirspaceGeometry>> {
        geometries.sort_by(|a, b| {
            b.class
                .priority()
                .cmp(&a.class.priority())
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut output: Vec<Arc<AirspaceGeometry>> = Vec::with_capacity(geometries.len());
        for (index, geometry) in geometries.iter().enumerate() {
            let bbox = geometry.bounding_box();
            let clips: Vec<PolygonRings> = geometries[..index]
                .iter()
                .filter(|earlier| {
                    earlier.class == geometry.class
                        && earlier.vertically_overlaps(geometry)
                        && match (earlier.bounding_box(), bbox) {
                            (Some(a), Some(b)) => a.intersects(&b),
                            _ => false,
                        }
                })
                .map(|earlier| earlier.rings.clone())
                .collect();

            if clips.is_empty() {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                output.push(Arc::clone(geometry));
                continue;
            }

            match self.clip(&[geometry.rings.clone()], &clips, ClipRule::Difference) {
                Ok(parts) if parts.is_empty() => {
                    debug!(id = %geometry.id, "Omitting fully covered airspace");
                }
                Ok(mut parts) if parts.len() == 1 => {
                    let rings = parts.remove(0);
                    let clipped = geometry.with_rings(rings, geometry.tolerance);
                    if clipped.to_polygon().map_or(0.0, |p| p.unsigned_area()) > 0.0 {
                        output.push(Arc::new(clipped));
                    } else {
                        debug!(id = %geometry.id, "Omitting fully covered airspace");
                    }
                }
                Ok(parts) => {
                    debug!(id = %geometry.id, parts = parts.len(), "Clip split airspace, keeping unclipped");
                    output.push(Arc::clone(geometry));
                }
                Err(e) => {
                    warn!(id = %geometry.id, error = %e, "Clipping failed, returning unclipped geometry");
                    output.push(Arc::clone(geometry));
                }
            }
        }

        output.sort_by(|a, b| a.id.cmp(&b.id));
        output
    }
}
