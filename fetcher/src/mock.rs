//! Synthetic observation producer for mock mode.
//!
//! Everything downstream of the fetch seam sees the same shapes and
//! timings as the real client, so a full pipeline can run without touching
//! the upstream API.

use crate::client::WeatherFetcher;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use common::model::{Location, Observation};
use errors::Result;
use rand::Rng;
use std::time::Duration;

const MIN_LATENCY_MS: u64 = 80;
const MAX_LATENCY_MS: u64 = 350;

/// Latitude band beyond which snow conditions become possible.
const SNOW_LATITUDE: f64 = 45.0;

/// (condition, weight) pool for the temperate/tropical band.
const BASE_CONDITIONS: &[(&str, u32)] = &[
    ("Clear", 30),
    ("Mainly Clear", 15),
    ("Partly Cloudy", 20),
    ("Overcast", 12),
    ("Fog", 4),
    ("Drizzle", 5),
    ("Rain", 8),
    ("Rain Showers", 4),
    ("Thunderstorm", 2),
];

/// Additional pool entries for high latitudes.
const SNOW_CONDITIONS: &[(&str, u32)] = &[("Snow", 5), ("Snow Showers", 3)];

pub struct MockWeatherClient;

impl MockWeatherClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockWeatherClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WeatherFetcher for MockWeatherClient {
    async fn fetch(&self, location: &Location) -> Result<Observation> {
        let latency = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(MIN_LATENCY_MS..=MAX_LATENCY_MS))
        };
        tokio::time::sleep(latency).await;

        // Upstream reports whole-second observation times; match that.
        let now = Utc
            .timestamp_opt(Utc::now().timestamp(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(synthesize(location, now, &mut rand::thread_rng()))
    }
}

/// Builds one synthetic observation. Split out from the latency simulation
/// so its distribution is testable.
fn synthesize<R: Rng>(location: &Location, now: DateTime<Utc>, rng: &mut R) -> Observation {
    let temperature = base_temperature(location.latitude)
        + seasonal_adjustment(location.latitude, now.month())
        + rng.gen_range(-3.0..3.0);

    Observation {
        city_name: location.city_name.clone(),
        latitude: location.latitude,
        longitude: location.longitude,
        temperature: (temperature * 10.0).round() / 10.0,
        weather_condition: pick_condition(location.latitude, rng),
        recorded_at: now,
    }
}

/// Warm equator, cold poles.
fn base_temperature(latitude: f64) -> f64 {
    28.0 - latitude.abs() * 0.55
}

/// Hemisphere-aware seasonal swing, peaking in July north of the equator
/// and in January south of it.
fn seasonal_adjustment(latitude: f64, month: u32) -> f64 {
    let amplitude = latitude.abs() * 0.25;
    let phase = (month as f64 - 7.0) / 12.0 * std::f64::consts::TAU;
    let northern = amplitude * phase.cos();
    if latitude >= 0.0 {
        northern
    } else {
        -northern
    }
}

fn pick_condition<R: Rng>(latitude: f64, rng: &mut R) -> String {
    let mut pool: Vec<(&str, u32)> = BASE_CONDITIONS.to_vec();
    if latitude.abs() > SNOW_LATITUDE {
        pool.extend_from_slice(SNOW_CONDITIONS);
    }

    let total: u32 = pool.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);
    for (condition, weight) in &pool {
        if roll < *weight {
            return (*condition).to_string();
        }
        roll -= weight;
    }
    "Clear".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_equator_warmer_than_arctic() {
        assert!(base_temperature(0.0) > base_temperature(70.0));
        assert!(base_temperature(70.0) < 0.0);
    }

    #[test]
    fn test_seasonal_adjustment_flips_hemisphere() {
        // July: warm in the north, cold in the south.
        let north = seasonal_adjustment(50.0, 7);
        let south = seasonal_adjustment(-50.0, 7);
        assert!(north > 0.0);
        assert!(south < 0.0);
        assert!((north + south).abs() < 1e-9);
    }

    #[test]
    fn test_no_snow_in_the_tropics() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let condition = pick_condition(10.0, &mut rng);
            assert!(!condition.contains("Snow"), "got {condition} at lat 10");
        }
    }

    #[test]
    fn test_snow_possible_at_high_latitude() {
        let mut rng = StdRng::seed_from_u64(7);
        let saw_snow = (0..2_000).any(|_| pick_condition(64.0, &mut rng).contains("Snow"));
        assert!(saw_snow);
    }

    #[test]
    fn test_synthesized_observation_shape() {
        let mut rng = StdRng::seed_from_u64(42);
        let location = Location::new("Reykjavik", 64.15, -21.94);
        let obs = synthesize(&location, sample_now(), &mut rng);
        assert_eq!(obs.city_name, "Reykjavik");
        assert_eq!(obs.latitude, 64.15);
        assert_eq!(obs.recorded_at, sample_now());
        assert!((-60.0..=60.0).contains(&obs.temperature));
    }
}
