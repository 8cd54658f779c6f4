use serde::{Deserialize, Serialize};

/// A catalog entry. The city name is the stable identity; coordinates are
/// what the upstream API is queried with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(city_name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            city_name: city_name.into(),
            latitude,
            longitude,
        }
    }

    /// Serialized job payload pushed onto the work queue.
    pub fn to_job(&self) -> errors::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a job payload popped from the work queue.
    pub fn from_job(payload: &str) -> errors::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trip() {
        let loc = Location::new("Reykjavik", 64.15, -21.94);
        let payload = loc.to_job().unwrap();
        let parsed = Location::from_job(&payload).unwrap();
        assert_eq!(parsed, loc);
    }

    #[test]
    fn test_invalid_job_payload() {
        assert!(Location::from_job("not json").is_err());
        assert!(Location::from_job("{\"city_name\":\"x\"}").is_err());
    }
}
