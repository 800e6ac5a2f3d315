//! Core data types: bounding boxes and airspace geometry records.

mod bounds;
mod geometry;

pub use bounds::{BoundingBox, BoundsError, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};
pub use geometry::{
    AirspaceClass, AirspaceGeometry, AltitudeReference, AltitudeUnit, Ring, VerticalLimit,
};
