//! Forecast fetch gate
//!
//! Decides per request whether the single cache slot can answer or the
//! provider has to be called, and refreshes the slot after a successful fetch.
//! Errors are never retried or swallowed here; callers decide what to show.

use chrono::{DateTime, SubsecRound, Utc};
use reqwest::{header, Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::{CacheEntry, CacheStore, StoreError};
use crate::config::ForecastConfig;
use crate::data::{decode, DecodeError, ForecastRequest, WeatherRecord};

/// Bound on connecting to and reading from the provider
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when resolving a forecast request
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Local cache storage failed
    #[error("Forecast cache failed: {0}")]
    Store(#[from] StoreError),

    /// Provider answered with anything but 200 OK
    #[error("HTTP error {0}")]
    Status(StatusCode),

    /// Request could not be sent or the response could not be read
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Connecting or reading exceeded the request timeout
    #[error("Forecast request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    /// Payload could not be decoded
    #[error("Failed to decode forecast: {0}")]
    Decode(#[from] DecodeError),
}

impl From<reqwest::Error> for ForecastError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForecastError::Timeout(e)
        } else {
            ForecastError::Request(e)
        }
    }
}

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Arbitrates between the cache slot and the forecast provider
#[derive(Debug)]
pub struct FetchGate {
    client: Client,
    config: ForecastConfig,
    store: CacheStore,
    /// Serializes check-then-read and fetch-then-overwrite on the slot
    slot_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FetchGate {
    /// Creates a gate with an HTTP client bounded by [`REQUEST_TIMEOUT`]
    pub fn new(config: ForecastConfig, store: CacheStore) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            config,
            store,
            slot_lock: Mutex::new(()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Replaces the clock used for cache freshness
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Builds the provider URL for a request
    ///
    /// Only the sections relevant to the request kind are asked for. Hourly and
    /// daily requests share the same query.
    pub fn forecast_url(&self, request: &ForecastRequest) -> String {
        format!(
            "{}/{}/{},{}?exclude={}{}&units=si&lang={}",
            self.config.base_url,
            self.config.api_key,
            request.location.latitude,
            request.location.longitude,
            request.kind.excluded_sections(),
            if request.kind.extends_hourly() {
                "&extend=hourly"
            } else {
                ""
            },
            self.config.language
        )
    }

    /// Resolves a request from the cache slot or the provider
    ///
    /// # Returns
    /// * `Ok(Vec<WeatherRecord>)` - Decoded records for the requested section
    /// * `Err(ForecastError)` - Storage, transport, timeout or decode failure
    ///
    /// # Behavior
    /// - With `use_cache`, a fresh slot for the same reduced coordinates is
    ///   decoded without any network I/O
    /// - Otherwise the provider is called and the payload decoded before it is
    ///   stored, so malformed payloads never reach the cache
    /// - Without `use_cache` the slot is neither read nor written
    ///
    /// Dropping the returned future before it completes leaves the slot as it was.
    pub async fn resolve(
        &self,
        request: &ForecastRequest,
    ) -> Result<Vec<WeatherRecord>, ForecastError> {
        if !request.use_cache {
            let payload = self.fetch_remote(request).await?;
            return Ok(decode(request.kind, &payload)?);
        }

        let _slot = self.slot_lock.lock().await;

        let now = self.clock.now();
        let cached = self
            .store
            .lookup(&request.location, self.config.cache_ttl, now)?;
        if let Some(payload) = cached {
            tracing::info!(kind = ?request.kind, "forecast served from cache");
            return Ok(decode(request.kind, &payload)?);
        }

        let payload = self.fetch_remote(request).await?;
        let records = decode(request.kind, &payload)?;

        // No await from here on: the overwrite runs to completion or not at all
        let fetched_at = self.clock.now().trunc_subsecs(3);
        let entry = CacheEntry::new(payload, fetched_at, &request.location);
        self.store.commit(&entry)?;

        Ok(records)
    }

    /// Calls the provider and returns the raw body
    async fn fetch_remote(&self, request: &ForecastRequest) -> Result<String, ForecastError> {
        tracing::info!(
            kind = ?request.kind,
            lat = request.location.latitude,
            lon = request.location.longitude,
            "fetching forecast"
        );

        let response = self
            .client
            .get(self.forecast_url(request))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(%status, "forecast provider returned an error");
            return Err(ForecastError::Status(status));
        }

        let headers = response.headers();
        tracing::debug!(
            api_calls = ?headers.get("X-Forecast-API-Calls").and_then(|v| v.to_str().ok()),
            response_time = ?headers.get("X-Response-Time").and_then(|v| v.to_str().ok()),
            "forecast provider responded"
        );

        Ok(response.text().await?)
    }
}
