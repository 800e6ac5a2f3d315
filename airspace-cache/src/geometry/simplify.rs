//! Douglas-Peucker ring simplification.
//!
//! The reduction is iterative (explicit span stack) so near-collinear rings
//! with thousands of vertices cannot exhaust the call stack. Rings are closed:
//! the first split is taken at the vertex farthest from the start, and the
//! two halves are reduced independently.
//!
//! Output rings always keep at least [`MIN_DISTINCT_VERTICES`] distinct
//! vertices, and simplifying an already simplified ring at the same tolerance
//! returns it unchanged.

use geo::Coord;
use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::config::SimplificationConfig;
use crate::model::{AirspaceGeometry, Ring};

/// Minimum distinct vertices of a ring (4 stored, counting the closure).
pub const MIN_DISTINCT_VERTICES: usize = 3;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimplifyError {
    #[error("Degenerate ring: {distinct_points} distinct points, at least 3 required")]
    Degenerate { distinct_points: usize },
}

/// Distance from `p` to the segment `a`-`b`.
fn segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    let px = a.x + t * dx;
    let py = a.y + t * dy;
    ((p.x - px).powi(2) + (p.y - py).powi(2)).sqrt()
}

/// Index and distance of the vertex in `(start, end)` farthest from the chord.
///
/// Ties resolve to the lowest index.
fn farthest_in_span(pts: &[Coord<f64>], start: usize, end: usize) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, p) in pts.iter().enumerate().take(end).skip(start + 1) {
        let d = segment_distance(*p, pts[start], pts[end]);
        if best.map_or(true, |(_, bd)| d > bd) {
            best = Some((i, d));
        }
    }
    best
}

/// Open vertex list with consecutive repeats and the closure removed.
fn open_vertices(ring: &Ring) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(ring.len());
    for p in ring.points() {
        if out.last() != Some(p) {
            out.push(*p);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Simplify one closed ring at tolerance `epsilon` (degrees).
///
/// A non-positive tolerance only removes repeated vertices.
pub fn simplify_ring(ring: &Ring, epsilon: f64) -> Result<Ring, SimplifyError> {
    let open = open_vertices(ring);
    if open.len() < MIN_DISTINCT_VERTICES {
        return Err(SimplifyError::Degenerate {
            distinct_points: open.len(),
        });
    }
    if epsilon <= 0.0 || open.len() == MIN_DISTINCT_VERTICES {
        return Ok(Ring::new(open));
    }

    // Closed working sequence: pts[m] == pts[0].
    let m = open.len();
    let mut pts = open;
    pts.push(pts[0]);

    let mut keep = vec![false; m + 1];
    keep[0] = true;
    keep[m] = true;

    let mut stack: Vec<(usize, usize)> = Vec::new();
    match farthest_in_span(&pts, 0, m) {
        Some((split, _)) => {
            keep[split] = true;
            stack.push((split, m));
            stack.push((0, split));
        }
        None => stack.push((0, m)),
    }

    while let Some((start, end)) = stack.pop() {
        if let Some((i, d)) = farthest_in_span(&pts, start, end) {
            if d > epsilon {
                keep[i] = true;
                stack.push((i, end));
                stack.push((start, i));
            }
        }
    }

    ensure_minimum(&pts, &mut keep);

    let kept: Vec<Coord<f64>> = pts[..m]
        .iter()
        .zip(&keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect();
    Ok(Ring::new(kept))
}

/// Re-add the most significant dropped vertices until the ring has enough.
fn ensure_minimum(pts: &[Coord<f64>], keep: &mut [bool]) {
    let m = pts.len() - 1;
    while keep[..m].iter().filter(|k| **k).count() < MIN_DISTINCT_VERTICES {
        let mut best: Option<(usize, f64)> = None;
        let mut prev = 0;
        for i in 1..=m {
            if !keep[i] {
                continue;
            }
            if let Some((idx, d)) = farthest_in_span(pts, prev, i) {
                if best.map_or(true, |(_, bd)| d > bd) {
                    best = Some((idx, d));
                }
            }
            prev = i;
        }
        match best {
            Some((idx, _)) => keep[idx] = true,
            None => break,
        }
    }
}

/// Simplify every ring of a geometry.
///
/// Holes that turn out degenerate are dropped with a warning; a degenerate
/// exterior fails the whole geometry.
pub fn simplify_geometry(
    geometry: &AirspaceGeometry,
    epsilon: f64,
) -> Result<AirspaceGeometry, SimplifyError> {
    let mut rings = Vec::with_capacity(geometry.rings.len());
    for (index, ring) in geometry.rings.iter().enumerate() {
        match simplify_ring(ring, epsilon) {
            Ok(r) => rings.push(r),
            Err(e) if index > 0 => {
                warn!(id = %geometry.id, ring = index, error = %e, "Dropping degenerate hole");
            }
            Err(e) => return Err(e),
        }
    }
    if rings.is_empty() {
        return Err(SimplifyError::Degenerate { distinct_points: 0 });
    }
    Ok(geometry.with_rings(rings, epsilon))
}

/// Zoom and altitude adaptive tolerance selection.
#[derive(Debug, Clone)]
pub struct SimplificationEngine {
    config: SimplificationConfig,
}

impl SimplificationEngine {
    pub fn new(config: SimplificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimplificationConfig {
        &self.config
    }

    /// Tolerance in degrees for rendering `geometry` at `zoom`.
    ///
    /// Interpolates log-linearly from the coarse tolerance at `coarse_zoom`
    /// down to the fine tolerance at `fine_zoom`. Zoom is quantised to
    /// quarter levels so nearby zooms share memoised results. Airspaces
    /// whose lower limit is above `high_altitude_feet` always get the
    /// coarse tolerance.
    pub fn tolerance_for(&self, zoom: f64, geometry: &AirspaceGeometry) -> f64 {
        let c = &self.config;
        if geometry.lower.to_feet() > c.high_altitude_feet {
            return c.coarse_tolerance;
        }
        let zoom = (zoom * 4.0).round() / 4.0;
        if zoom <= c.coarse_zoom {
            return c.coarse_tolerance;
        }
        if zoom >= c.fine_zoom {
            return c.fine_tolerance;
        }
        let t = (zoom - c.coarse_zoom) / (c.fine_zoom - c.coarse_zoom);
        let ln = c.coarse_tolerance.ln() + t * (c.fine_tolerance.ln() - c.coarse_tolerance.ln());
        ln.exp()
    }

    /// Simplify a geometry for display at `zoom`.
    pub fn simplify(
        &self,
        geometry: &AirspaceGeometry,
        zoom: f64,
    ) -> Result<AirspaceGeometry, SimplifyError> {
        simplify_geometry(geometry, self.tolerance_for(zoom, geometry))
    }

    /// Simplify a batch in parallel, each at its own pre-computed tolerance.
    ///
    /// Degenerate geometries are logged and dropped. Blocking: call from a
    /// blocking-pool thread.
    pub fn simplify_batch(&self, batch: &[(AirspaceGeometry, f64)]) -> Vec<AirspaceGeometry> {
        batch
            .par_iter()
            .filter_map(|(geometry, epsilon)| match simplify_geometry(geometry, *epsilon) {
                Ok(simplified) => Some(simplified),
                Err(e) => {
                    warn!(id = %geometry.id, error = %e, "Dropping degenerate airspace");
                    None
                }
            })
            .collect()
    }
}
