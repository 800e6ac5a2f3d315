//! Geometry preparation: simplification and overlap clipping.

pub mod clip;
pub mod simplify;

pub use clip::{ClipError, ClipRule, ClipStats, ClippingEngine, PolygonRings};
pub use simplify::{
    simplify_geometry, simplify_ring, SimplificationEngine, SimplifyError, MIN_DISTINCT_VERTICES,
};
