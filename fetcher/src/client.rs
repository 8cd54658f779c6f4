//! Upstream current-weather client.

use crate::wmo;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::model::{Location, Observation};
use errors::{Error, FetchError, Result};
use log::{debug, warn};
use rand::Rng;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const UPSTREAM_BASE: &str = "https://api.open-meteo.com/v1/forecast";

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 32_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The fetch seam. The worker pool holds this as a trait object so mock
/// mode swaps the transport without touching anything downstream.
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch(&self, location: &Location) -> Result<Observation>;
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    weathercode: u32,
    /// Epoch seconds; the request asks for `timeformat=unixtime`.
    time: i64,
}

pub struct HttpWeatherClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWeatherClient {
    /// `concurrency` sizes the connection pool: every worker may hold one
    /// in-flight request against the same host.
    pub fn new(concurrency: usize) -> Result<Self> {
        Self::with_base_url(UPSTREAM_BASE, concurrency)
    }

    pub fn with_base_url(base_url: impl Into<String>, concurrency: usize) -> Result<Self> {
        // IPv4 only: some deployments stall for seconds on AAAA lookups.
        let client = reqwest::Client::builder()
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .pool_max_idle_per_host(concurrency)
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.into()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn build_url(&self, location: &Location) -> String {
        format!(
            "{}?latitude={}&longitude={}&current_weather=true&timeformat=unixtime",
            self.base_url, location.latitude, location.longitude
        )
    }

    async fn attempt(&self, url: &str, location: &Location) -> Result<Observation> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(FetchError::Timeout.into()),
            Err(e) => return Err(FetchError::Network(e.into()).into()),
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(FetchError::Throttled { retry_after }.into());
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()).into());
        }

        let body: ForecastResponse = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

        let current = body.current_weather.ok_or_else(|| {
            Error::from(FetchError::MalformedPayload(
                "missing current_weather".to_string(),
            ))
        })?;

        let recorded_at = Utc
            .timestamp_opt(current.time, 0)
            .single()
            .ok_or_else(|| {
                Error::from(FetchError::MalformedPayload(format!(
                    "invalid observation time {}",
                    current.time
                )))
            })?;

        Ok(Observation {
            city_name: location.city_name.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
            temperature: current.temperature,
            weather_condition: wmo::condition(current.weathercode),
            recorded_at,
        })
    }
}

#[async_trait]
impl WeatherFetcher for HttpWeatherClient {
    async fn fetch(&self, location: &Location) -> Result<Observation> {
        let url = self.build_url(location);

        let mut attempt = 1;
        loop {
            match self.attempt(&url, location).await {
                Ok(observation) => return Ok(observation),
                Err(err) => {
                    let retry_after = retryable_after(&err);
                    let eligible = retry_after.is_some();
                    if !eligible || attempt >= MAX_ATTEMPTS {
                        return Err(err);
                    }

                    let delay = match retry_after.flatten() {
                        // Upstream named its own pause; respect it.
                        Some(secs) => Duration::from_secs(secs),
                        None => full_jitter_delay(attempt),
                    };
                    debug!(
                        "Fetch for {} failed on attempt {attempt} ({err}), retrying in {delay:?}",
                        location.city_name
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `Some(retry_after)` when the error is retry-eligible; the inner value
/// carries an upstream `Retry-After` override when one was sent.
fn retryable_after(err: &Error) -> Option<Option<u64>> {
    let source = err.inner.source.as_ref()?;
    match source.downcast_ref::<FetchError>()? {
        FetchError::Throttled { retry_after } => Some(*retry_after),
        FetchError::Timeout => Some(None),
        FetchError::Network(_) => Some(None),
        FetchError::Status(code) if (500..600).contains(&u32::from(*code)) => Some(None),
        FetchError::Status(code) => {
            warn!("Upstream returned non-retryable status {code}");
            None
        }
        FetchError::MalformedPayload(_) => None,
    }
}

/// Full-jitter exponential backoff: uniform over [0, min(cap, base·2^n)].
fn full_jitter_delay(attempt: u32) -> Duration {
    let ceiling = backoff_ceiling_ms(attempt);
    let millis = rand::thread_rng().gen_range(0..=ceiling);
    Duration::from_millis(millis)
}

fn backoff_ceiling_ms(attempt: u32) -> u64 {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(16));
    exp.min(BACKOFF_CAP_MS)
}
