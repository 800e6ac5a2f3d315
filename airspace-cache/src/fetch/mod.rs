//! Remote airspace source.
//!
//! [`AirspaceFetcher`] is the contract the cache manager depends on; the
//! HTTP implementation lives in [`http`]. [`coalesce`] provides per-tile
//! single-flight, and [`backoff`] the retry policy for transient failures.

pub mod backoff;
pub mod coalesce;
pub mod http;

use std::future::Future;

use thiserror::Error;

use crate::model::{AirspaceGeometry, BoundingBox};

pub use backoff::{fetch_with_retry, Backoff, RetryPolicy};
pub use coalesce::{InFlightRegistry, Registration};
pub use http::{AsyncHttpClient, HttpAirspaceFetcher, HttpResponse, ReqwestClient};

/// Errors from the remote airspace source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network failure, timeout or server overload. Safe to retry.
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// Authentication, bad request or undecodable response. Not retried.
    #[error("Permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            FetchError::Transient(m) | FetchError::Permanent(m) => m,
        }
    }
}

/// Geometries returned for one bounding-box query.
#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub geometries: Vec<AirspaceGeometry>,
    /// Epoch millis at which the source produced this data.
    pub fetched_at: i64,
}

/// Per-tile failure marker carried in viewport results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub retryable: bool,
    pub message: String,
}

impl From<&FetchError> for FetchFailure {
    fn from(e: &FetchError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.message().to_string(),
        }
    }
}

/// Source of airspace geometry for a bounding box.
pub trait AirspaceFetcher: Send + Sync + 'static {
    /// Fetch every airspace intersecting `bounds`.
    fn fetch_airspaces(
        &self,
        bounds: BoundingBox,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}
