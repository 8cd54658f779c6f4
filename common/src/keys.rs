//! Redis key names shared by both processes.
//!
//! These are wire contract, not style: external tooling and dashboards
//! address the same keys, so they must not drift.

/// Job list refreshed once per cycle.
pub const LOCATIONS_QUEUE: &str = "weather:locations:queue";

/// Append-only stream of raw observations.
pub const RAW_STREAM: &str = "weather:raw";

/// Consumer group on [`RAW_STREAM`].
pub const CONSUMER_GROUP: &str = "weather-processors";

/// Monotonically increasing cycle counter.
pub const CYCLE_ID: &str = "weather:cycle:id";

/// Millisecond timestamp of the current cycle's start.
pub const CYCLE_START_MS: &str = "weather:cycle:start_ms";

/// Token bucket hash: {tokens, last_refill}.
pub const RATE_BUCKET: &str = "rate_limiter:weather_api:bucket";

/// Cooldown flag; presence suppresses all token grants.
pub const RATE_COOLDOWN: &str = "rate_limiter:weather_api:cooldown";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_key_names() {
        assert_eq!(LOCATIONS_QUEUE, "weather:locations:queue");
        assert_eq!(RAW_STREAM, "weather:raw");
        assert_eq!(CYCLE_ID, "weather:cycle:id");
        assert_eq!(CYCLE_START_MS, "weather:cycle:start_ms");
        assert_eq!(RATE_BUCKET, "rate_limiter:weather_api:bucket");
        assert_eq!(RATE_COOLDOWN, "rate_limiter:weather_api:cooldown");
    }
}
