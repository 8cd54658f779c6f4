//! Shared token bucket.
//!
//! The bucket lives in Redis so every fetcher replica draws from one
//! budget. Refill and spend happen in a single server-side script; doing it
//! client-side would let two workers spend the same token.

use deadpool_redis::redis::Script;
use deadpool_redis::Pool;
use errors::{RateLimitError, Result};
use log::{debug, warn};
use metrics::counter;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tokens the bucket holds when full.
pub const CAPACITY: f64 = 8.0;
/// Tokens restored per second. Below the upstream 600/min cap to absorb
/// jitter.
pub const REFILL_RATE: f64 = 8.0;
/// Bucket hash TTL. A silent process leaves no stale bucket behind; the
/// next acquire re-initializes to full capacity.
pub const BUCKET_TTL_SECS: u64 = 60;
/// Cooldown installed when the upstream answers 429.
pub const COOLDOWN_TTL_SECS: u64 = 30;
/// Pause between retries after a plain DENIED.
pub const DENIED_BACKOFF: Duration = Duration::from_millis(40);

/// Refill-and-spend, evaluated atomically.
///
/// `KEYS[1]` -> bucket hash {tokens, last_refill}
/// `ARGV[1]` -> current wall-clock time in seconds (fractional)
/// `ARGV[2]` -> capacity
/// `ARGV[3]` -> refill rate (tokens/sec)
/// `ARGV[4]` -> bucket TTL in seconds
///
/// Returns 1 when a token was granted, 0 when denied.
const ACQUIRE_SCRIPT: &str = r#"
    local tokens = tonumber(redis.call("HGET", KEYS[1], "tokens"))
    local last_refill = tonumber(redis.call("HGET", KEYS[1], "last_refill"))
    local now = tonumber(ARGV[1])
    local capacity = tonumber(ARGV[2])
    local rate = tonumber(ARGV[3])
    local ttl = tonumber(ARGV[4])

    if tokens == nil or last_refill == nil then
        tokens = capacity
        last_refill = now
    end

    local elapsed = now - last_refill
    if elapsed < 0 then
        elapsed = 0
    end
    tokens = tokens + elapsed * rate
    if tokens > capacity then
        tokens = capacity
    end

    local granted = 0
    if tokens >= 1 then
        tokens = tokens - 1
        granted = 1
    end

    redis.call("HSET", KEYS[1], "tokens", tokens, "last_refill", now)
    redis.call("EXPIRE", KEYS[1], ttl)
    return granted
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: Pool,
    bucket_key: String,
    cooldown_key: String,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            bucket_key: common::keys::RATE_BUCKET.to_string(),
            cooldown_key: common::keys::RATE_COOLDOWN.to_string(),
            capacity: CAPACITY,
            refill_rate: REFILL_RATE,
        }
    }

    /// Blocks until the caller holds one token.
    ///
    /// Cooldown takes precedence over the bucket: while the flag is live,
    /// the acquirer sleeps exactly its remaining TTL instead of polling on
    /// a fixed interval.
    pub async fn acquire(&self) -> Result<()> {
        loop {
            if let Some(remaining) = self.cooldown_remaining().await? {
                debug!("Cooldown active, pausing acquire for {remaining:?}");
                tokio::time::sleep(remaining).await;
                continue;
            }

            match self.try_acquire().await? {
                Decision::Granted => {
                    counter!("rate_limiter_granted_total").increment(1);
                    return Ok(());
                }
                Decision::Denied => {
                    counter!("rate_limiter_denied_total").increment(1);
                    tokio::time::sleep(DENIED_BACKOFF).await;
                }
            }
        }
    }

    /// One script round trip; never sleeps.
    pub async fn try_acquire(&self) -> Result<Decision> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::RedisError(e.into()))?;

        let granted: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(&self.bucket_key)
            .arg(now_secs())
            .arg(self.capacity)
            .arg(self.refill_rate)
            .arg(BUCKET_TTL_SECS)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::ScriptError(e.into()))?;

        Ok(if granted == 1 {
            Decision::Granted
        } else {
            Decision::Denied
        })
    }

    /// Remaining cooldown, if one is active.
    pub async fn cooldown_remaining(&self) -> Result<Option<Duration>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::RedisError(e.into()))?;

        let pttl: i64 = deadpool_redis::redis::cmd("PTTL")
            .arg(&self.cooldown_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::RedisError(e.into()))?;

        if pttl > 0 {
            Ok(Some(Duration::from_millis(pttl as u64)))
        } else {
            Ok(None)
        }
    }

    /// Installs the process-wide cooldown. First throttle wins: a cooldown
    /// that is already running is not extended by concurrent callers.
    ///
    /// Returns true when this call installed the flag.
    pub async fn notify_throttled(&self) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RateLimitError::RedisError(e.into()))?;

        let set: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(&self.cooldown_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(COOLDOWN_TTL_SECS)
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::RedisError(e.into()))?;

        let installed = set.is_some();
        if installed {
            warn!("Upstream throttled; cooldown installed for {COOLDOWN_TTL_SECS}s");
            counter!("rate_limiter_cooldowns_total").increment(1);
        }
        Ok(installed)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_touches_only_expected_commands() {
        for cmd in ["HGET", "HSET", "EXPIRE"] {
            assert!(ACQUIRE_SCRIPT.contains(cmd), "script must use {cmd}");
        }
        // Read-modify-write stays inside the script; no GET/SET split.
        assert!(!ACQUIRE_SCRIPT.contains("\"GET\""));
    }

    #[test]
    fn test_budget_constants() {
        assert_eq!(CAPACITY, 8.0);
        assert_eq!(REFILL_RATE, 8.0);
        assert_eq!(BUCKET_TTL_SECS, 60);
        assert_eq!(COOLDOWN_TTL_SECS, 30);
        assert_eq!(DENIED_BACKOFF, Duration::from_millis(40));
    }

    #[test]
    fn test_now_secs_is_fractional() {
        let a = now_secs();
        assert!(a > 1_600_000_000.0);
    }
}
