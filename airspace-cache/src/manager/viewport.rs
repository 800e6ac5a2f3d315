//! Viewport request results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::fetch::FetchFailure;
use crate::model::AirspaceGeometry;
use crate::tiling::{TileKey, TileMetadata};

/// How one tile of a viewport was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileStatus {
    HotHit,
    ColdHit,
    /// Fetched from the remote source by this request.
    Fetched,
    /// Served by a fetch another request had in flight.
    Coalesced,
    Failed(FetchFailure),
    /// A newer viewport request superseded this one.
    Cancelled,
}

impl TileStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, TileStatus::Failed(_) | TileStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TileStatus::HotHit => "hot",
            TileStatus::ColdHit => "cold",
            TileStatus::Fetched => "fetched",
            TileStatus::Coalesced => "coalesced",
            TileStatus::Failed(_) => "failed",
            TileStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileStatus::Failed(failure) => write!(
                f,
                "failed ({}{})",
                failure.message,
                if failure.retryable { ", retryable" } else { "" }
            ),
            other => f.write_str(other.label()),
        }
    }
}

/// Render-ready airspaces for a viewport plus per-tile status.
#[derive(Debug, Clone, Default)]
pub struct ViewportResult {
    /// Simplified and clipped geometry, ordered by id.
    pub geometries: Vec<Arc<AirspaceGeometry>>,
    pub tile_status: BTreeMap<TileKey, TileStatus>,
}

impl ViewportResult {
    pub fn ids(&self) -> Vec<&str> {
        self.geometries.iter().map(|g| g.id.as_str()).collect()
    }

    /// True when every tile resolved.
    pub fn is_complete(&self) -> bool {
        self.tile_status.values().all(TileStatus::is_success)
    }

    pub fn failed_tiles(&self) -> Vec<TileKey> {
        self.tile_status
            .iter()
            .filter(|(_, s)| matches!(s, TileStatus::Failed(_)))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Tile counts per status label.
    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for status in self.tile_status.values() {
            *counts.entry(status.label()).or_insert(0) += 1;
        }
        counts
    }
}

/// A tile record with its geometries, as produced by a region fetch.
#[derive(Debug, Clone)]
pub(crate) struct TileResolution {
    pub tile: Arc<TileMetadata>,
    pub geometries: Vec<Arc<AirspaceGeometry>>,
}

/// Result broadcast to every request waiting on a tile.
#[derive(Debug, Clone)]
pub(crate) enum TileOutcome {
    Fetched(Arc<TileResolution>),
    Failed(FetchFailure),
    Cancelled,
}
