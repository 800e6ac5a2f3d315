//! HTTP airspace source.
//!
//! Queries `GET {base_url}?bbox=minLon,minLat,maxLon,maxLat` and decodes
//!
//! ```json
//! { "items": [ { "id": "...", "name": "...", "class": "CTR",
//!                "lower": { "value": 0, "unit": "FT", "reference": "GND" },
//!                "upper": { "value": 65, "unit": "FL", "reference": "STD" },
//!                "rings": [ [ [lon, lat], ... ], ... ] } ] }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{AirspaceFetcher, FetchError, FetchResponse};
use crate::config::RemoteConfig;
use crate::model::{AirspaceClass, AirspaceGeometry, BoundingBox, Ring, VerticalLimit};
use crate::time::{Clock, SystemClock};

/// Header carrying the API key, when one is configured.
pub const API_KEY_HEADER: &str = "X-API-Key";

const USER_AGENT: &str = concat!("airspace-cache/", env!("CARGO_PKG_VERSION"));

/// Raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Asynchronous HTTP GET, abstracted for testing.
pub trait AsyncHttpClient: Send + Sync + 'static {
    /// Performs a GET with extra headers. Transport failures are transient
    /// errors; any received response, whatever its status, is `Ok`.
    fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> impl Future<Output = Result<HttpResponse, FetchError>> + Send;
}

/// Production client backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Permanent(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl AsyncHttpClient for ReqwestClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("Request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to read response: {}", e)))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Map a non-success HTTP status to a fetch error.
pub fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        408 | 429 | 500..=599 => Some(FetchError::Transient(format!("HTTP {}", status))),
        _ => Some(FetchError::Permanent(format!("HTTP {}", status))),
    }
}

#[derive(Debug, Deserialize)]
struct AirspaceList {
    items: Vec<AirspaceItem>,
}

#[derive(Debug, Deserialize)]
struct AirspaceItem {
    id: String,
    #[serde(default)]
    name: String,
    class: AirspaceClass,
    lower: VerticalLimit,
    upper: VerticalLimit,
    rings: Vec<Vec<[f64; 2]>>,
}

impl AirspaceItem {
    fn into_geometry(self, fetched_at: i64) -> Option<AirspaceGeometry> {
        let rings: Vec<Ring> = self
            .rings
            .iter()
            .map(|ring| {
                let pairs: Vec<(f64, f64)> = ring.iter().map(|p| (p[0], p[1])).collect();
                Ring::from_lon_lat(&pairs)
            })
            .collect();
        match rings.first() {
            Some(exterior) if exterior.distinct_len() >= 3 => Some(AirspaceGeometry::new(
                self.id, self.name, self.class, self.lower, self.upper, rings, fetched_at,
            )),
            _ => {
                warn!(id = %self.id, "Skipping airspace without a usable exterior ring");
                None
            }
        }
    }
}

/// Decode a response body into geometries stamped with `fetched_at`.
pub fn decode_airspaces(body: &[u8], fetched_at: i64) -> Result<Vec<AirspaceGeometry>, FetchError> {
    let list: AirspaceList = serde_json::from_slice(body)
        .map_err(|e| FetchError::Permanent(format!("Invalid airspace response: {}", e)))?;
    Ok(list
        .items
        .into_iter()
        .filter_map(|item| item.into_geometry(fetched_at))
        .collect())
}

/// [`AirspaceFetcher`] over an HTTP JSON endpoint.
pub struct HttpAirspaceFetcher<C> {
    client: C,
    base_url: String,
    api_key: Option<String>,
    clock: Arc<dyn Clock>,
}

impl<C: AsyncHttpClient> HttpAirspaceFetcher<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Query URL for `bounds`.
    pub fn url_for(&self, bounds: &BoundingBox) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}bbox={},{},{},{}",
            self.base_url, separator, bounds.west, bounds.south, bounds.east, bounds.north
        )
    }
}

impl HttpAirspaceFetcher<ReqwestClient> {
    /// Build a fetcher from the `[remote]` configuration.
    pub fn from_config(config: &RemoteConfig) -> Result<Self, FetchError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| FetchError::Permanent("No remote endpoint configured".to_string()))?;
        let fetcher = Self::new(ReqwestClient::new(config.timeout)?, endpoint);
        Ok(match &config.api_key {
            Some(key) => fetcher.with_api_key(key.clone()),
            None => fetcher,
        })
    }
}

impl<C: AsyncHttpClient> AirspaceFetcher for HttpAirspaceFetcher<C> {
    async fn fetch_airspaces(&self, bounds: BoundingBox) -> Result<FetchResponse, FetchError> {
        let url = self.url_for(&bounds);
        let mut headers = vec![("Accept", "application/json")];
        if let Some(key) = &self.api_key {
            headers.push((API_KEY_HEADER, key.as_str()));
        }

        debug!(url = %url, "Requesting airspaces");
        let response = self.client.get_with_headers(&url, &headers).await?;
        if let Some(e) = classify_status(response.status) {
            return Err(e);
        }

        let fetched_at = self.clock.now_millis();
        let geometries = decode_airspaces(&response.body, fetched_at)?;
        debug!(bounds = %bounds, count = geometries.len(), "Decoded airspaces");
        Ok(FetchResponse {
            geometries,
            fetched_at,
        })
    }
}
