//! Types shared across CLI commands.

use airspace_cache::{AirspaceFetcher, BoundingBox, FetchError, FetchResponse};

/// Fetcher for commands that only work with cached data.
pub struct OfflineFetcher;

impl AirspaceFetcher for OfflineFetcher {
    async fn fetch_airspaces(&self, _bounds: BoundingBox) -> Result<FetchResponse, FetchError> {
        Err(FetchError::Permanent("offline: no remote endpoint configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_fetcher_never_retries() {
        let bounds = BoundingBox::new(45.0, 6.0, 47.0, 9.0).unwrap();
        let err = OfflineFetcher.fetch_airspaces(bounds).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
