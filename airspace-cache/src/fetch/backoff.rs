//! Exponential backoff with jitter for transient fetch failures.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use super::{AirspaceFetcher, FetchError, FetchResponse};
use crate::config::RemoteConfig;
use crate::model::BoundingBox;

/// Doubling delay sequence capped at `max`, with up to 20% added jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            jitter_ratio: 0.2,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    let jitter_ms_max = (delay.as_millis() as f64 * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u128)
        .unwrap_or(0);
    delay + Duration::from_millis((now_nanos % (jitter_ms_max + 1)) as u64)
}

/// Attempt budget and timing for remote fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.timeout,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }
}

/// Fetch `bounds`, retrying transient failures with backoff.
///
/// Each attempt is bounded by the policy timeout; an attempt that times out
/// counts as a transient failure.
pub async fn fetch_with_retry<F: AirspaceFetcher>(
    fetcher: &F,
    bounds: BoundingBox,
    policy: &RetryPolicy,
) -> Result<FetchResponse, FetchError> {
    let mut backoff = Backoff::new(policy.base_delay, policy.max_delay);
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, fetcher.fetch_airspaces(bounds)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "timed out after {}s",
                policy.timeout.as_secs_f64()
            ))),
        };

        match result {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = backoff.next_delay();
                warn!(
                    bounds = %bounds,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Remote fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(bounds = %bounds, attempts = attempt + 1, error = %e, "Remote fetch gave up");
                return Err(e);
            }
        }
    }
}
