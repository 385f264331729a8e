//! Upstream rate fetcher trait and implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use ratecache_common::{from_unix_seconds, FetchError, LatestRates, RateTable};

/// Source of the latest upstream exchange rates.
///
/// Implementations own their retry policy. `Ok(None)` means the provider
/// answered but had no usable data.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch the latest rates.
    async fn fetch_latest(&self) -> Result<Option<LatestRates>, FetchError>;
}

/// Retry policy for upstream requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
    /// Upper bound on a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Configuration for the Open Exchange Rates client.
#[derive(Debug, Clone)]
pub struct OpenExchangeRatesConfig {
    /// Endpoint returning the latest rates, e.g.
    /// `https://openexchangerates.org/api/latest.json`.
    pub base_url: String,
    /// Application ID sent as `app_id`.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy.
    pub retry: RetryPolicy,
}

impl Default for OpenExchangeRatesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openexchangerates.org/api/latest.json".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// `latest.json` response body.
#[derive(Debug, Deserialize)]
struct LatestResponse {
    timestamp: i64,
    base: String,
    #[serde(default)]
    rates: RateTable,
}

/// Fetches rates from the Open Exchange Rates HTTP API.
#[derive(Debug, Clone)]
pub struct OpenExchangeRatesFetcher {
    client: reqwest::Client,
    config: OpenExchangeRatesConfig,
}

impl OpenExchangeRatesFetcher {
    /// Create a new fetcher.
    pub fn new(config: OpenExchangeRatesConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    async fn fetch_once(&self) -> Result<Option<LatestRates>, FetchError> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("app_id", self.config.api_key.as_str())])
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Upstream {
                status: status.as_u16(),
                message: truncate(&message, 256),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let parsed: Option<LatestResponse> =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let Some(parsed) = parsed else {
            return Ok(None);
        };
        if parsed.rates.is_empty() {
            return Ok(None);
        }

        let observed_at = from_unix_seconds(parsed.timestamp).ok_or_else(|| {
            FetchError::Decode(format!("timestamp out of range: {}", parsed.timestamp))
        })?;

        Ok(Some(LatestRates::new(parsed.base, parsed.rates, observed_at)))
    }
}

#[async_trait]
impl RateFetcher for OpenExchangeRatesFetcher {
    fn name(&self) -> &str {
        "openexchangerates"
    }

    async fn fetch_latest(&self) -> Result<Option<LatestRates>, FetchError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch_once().await {
                Ok(rates) => {
                    debug!(provider = self.name(), attempt, "Fetched latest rates");
                    return Ok(rates);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    warn!(
                        provider = self.name(),
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Rate fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn truncate(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &message[..idx]),
        None => message.to_string(),
    }
}

/// Scripted fetcher for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateFetcher {
    name: String,
    response: parking_lot::Mutex<MockResponse>,
    delay: parking_lot::Mutex<Option<Duration>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
enum MockResponse {
    Rates(LatestRates),
    Empty,
    Failure(String),
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateFetcher {
    /// Create a fetcher that returns no data until told otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: parking_lot::Mutex::new(MockResponse::Empty),
            delay: parking_lot::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Return these rates from now on.
    pub fn set_rates(&self, rates: LatestRates) {
        *self.response.lock() = MockResponse::Rates(rates);
    }

    /// Return `Ok(None)` from now on.
    pub fn set_empty(&self) {
        *self.response.lock() = MockResponse::Empty;
    }

    /// Fail with a network error from now on.
    pub fn set_failure(&self, message: impl Into<String>) {
        *self.response.lock() = MockResponse::Failure(message.into());
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of `fetch_latest` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateFetcher for MockRateFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_latest(&self) -> Result<Option<LatestRates>, FetchError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.response.lock().clone();
        match response {
            MockResponse::Rates(rates) => Ok(Some(rates)),
            MockResponse::Empty => Ok(None),
            MockResponse::Failure(message) => Err(FetchError::Network(message)),
        }
    }
}
