use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use errors::{Error, ErrorKind};
use std::collections::HashMap;

/// Stream entry field names. All values cross the wire as strings.
pub const FIELD_CITY: &str = "city_name";
pub const FIELD_LAT: &str = "latitude";
pub const FIELD_LON: &str = "longitude";
pub const FIELD_TEMP: &str = "temperature";
pub const FIELD_CONDITION: &str = "weather_condition";
pub const FIELD_RECORDED_AT: &str = "recorded_at";

/// One current-weather observation.
///
/// `recorded_at` is the upstream-reported observation time, never the time
/// this process touched the data. It doubles as the deduplication key in the
/// time-series store, so it must survive the stream round trip unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub city_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature: f64,
    pub weather_condition: String,
    pub recorded_at: DateTime<Utc>,
}

impl Observation {
    /// Encodes into the stream field map.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_CITY, self.city_name.clone()),
            (FIELD_LAT, self.latitude.to_string()),
            (FIELD_LON, self.longitude.to_string()),
            (FIELD_TEMP, self.temperature.to_string()),
            (FIELD_CONDITION, self.weather_condition.clone()),
            (
                FIELD_RECORDED_AT,
                self.recorded_at
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ]
    }

    /// Decodes a stream field map.
    ///
    /// Missing fields fall back to defaults (city/condition "unknown",
    /// numerics 0, timestamp now). A `recorded_at` that is present but
    /// unparseable is an error: writing such a point would land on a bogus
    /// time axis, so the entry is rejected instead.
    pub fn from_fields(fields: &HashMap<String, String>) -> errors::Result<Self> {
        let city_name = fields
            .get(FIELD_CITY)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let latitude = parse_f64(fields.get(FIELD_LAT));
        let longitude = parse_f64(fields.get(FIELD_LON));
        let temperature = parse_f64(fields.get(FIELD_TEMP));
        let weather_condition = fields
            .get(FIELD_CONDITION)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let recorded_at = match fields.get(FIELD_RECORDED_AT) {
            None => Utc::now(),
            Some(raw) => parse_recorded_at(raw).ok_or_else(|| {
                Error::with_message(
                    ErrorKind::Stream,
                    format!("unparseable recorded_at: {raw}"),
                    None::<errors::BoxError>,
                )
            })?,
        };

        Ok(Self {
            city_name,
            latitude,
            longitude,
            temperature,
            weather_condition,
            recorded_at,
        })
    }

    /// Millisecond timestamp used as the store's dedup key.
    pub fn recorded_at_ms(&self) -> i64 {
        self.recorded_at.timestamp_millis()
    }
}

fn parse_f64(raw: Option<&String>) -> f64 {
    raw.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

/// Accepts RFC 3339 or an epoch-milliseconds integer.
fn parse_recorded_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields_of(obs: &Observation) -> HashMap<String, String> {
        obs.to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> Observation {
        Observation {
            city_name: "Lagos".to_string(),
            latitude: 6.52,
            longitude: 3.38,
            temperature: 31.4,
            weather_condition: "Partly Cloudy".to_string(),
            recorded_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_field_round_trip() {
        let obs = sample();
        let parsed = Observation::from_fields(&fields_of(&obs)).unwrap();
        assert_eq!(parsed, obs);
        assert_eq!(parsed.recorded_at_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let parsed = Observation::from_fields(&HashMap::new()).unwrap();
        assert_eq!(parsed.city_name, "unknown");
        assert_eq!(parsed.weather_condition, "unknown");
        assert_eq!(parsed.latitude, 0.0);
        assert_eq!(parsed.temperature, 0.0);
        // Absent timestamp falls back to "now" rather than epoch 0.
        assert!(parsed.recorded_at_ms() > 1_500_000_000_000);
    }

    #[test]
    fn test_numeric_fallback_to_zero() {
        let mut fields = fields_of(&sample());
        fields.insert(FIELD_TEMP.to_string(), "warm".to_string());
        let parsed = Observation::from_fields(&fields).unwrap();
        assert_eq!(parsed.temperature, 0.0);
    }

    #[test]
    fn test_epoch_ms_timestamp_accepted() {
        let mut fields = fields_of(&sample());
        fields.insert(
            FIELD_RECORDED_AT.to_string(),
            "1700000000000".to_string(),
        );
        let parsed = Observation::from_fields(&fields).unwrap();
        assert_eq!(parsed.recorded_at_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_garbage_timestamp_rejected() {
        let mut fields = fields_of(&sample());
        fields.insert(FIELD_RECORDED_AT.to_string(), "yesterday".to_string());
        let err = Observation::from_fields(&fields).unwrap_err();
        assert!(err.is_stream());
    }
}
