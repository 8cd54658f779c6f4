use errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_METRICS_PORT: u16 = 3000;

/// Configuration shared by both processes, read from the environment once
/// at startup. Anything missing or malformed here is fatal (exit 1); there
/// is no reload path.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub use_mock: bool,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let redis_url = require("REDIS_URL")?;
        let use_mock = env::var("USE_MOCK")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        let metrics_port = match env::var("METRICS_PORT") {
            Err(_) => DEFAULT_METRICS_PORT,
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                name: "METRICS_PORT".to_string(),
                value: raw,
            })?,
        };

        Ok(Self {
            redis_url,
            use_mock,
            metrics_port,
        })
    }
}

/// Time-series store settings; required only by the processor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: require("INFLUX_URL")?,
            token: require("INFLUX_TOKEN")?,
            org: require("INFLUX_ORG")?,
            bucket: require("INFLUX_BUCKET")?,
        })
    }
}

fn require(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name.to_string()).into()),
    }
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("YES"));
        assert!(parse_bool(" on "));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_require_rejects_empty() {
        // A variable set to whitespace is as missing as an unset one.
        std::env::set_var("TEST_REQUIRE_EMPTY", "   ");
        assert!(require("TEST_REQUIRE_EMPTY").is_err());
        std::env::remove_var("TEST_REQUIRE_EMPTY");
        assert!(require("TEST_REQUIRE_EMPTY").is_err());
    }
}
