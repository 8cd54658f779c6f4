use deadpool_redis::{Config, Pool, Runtime};
use errors::{BrokerError, Result};

const POOL_MAX_SIZE: usize = 100;

/// Builds the shared connection pool from `REDIS_URL`.
pub fn create_pool(redis_url: &str) -> Result<Pool> {
    let mut cfg = Config::from_url(redis_url);
    cfg.pool = Some(deadpool_redis::PoolConfig {
        max_size: POOL_MAX_SIZE,
        ..Default::default()
    });
    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| BrokerError::ConnectionFailed(e.into()).into())
}

/// Round-trip check used at startup and by the health probe.
pub async fn ping(pool: &Pool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| BrokerError::ConnectionFailed(e.into()))?;
    let pong: String = deadpool_redis::redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| BrokerError::CommandFailed(e.into()))?;
    if pong == "PONG" {
        Ok(())
    } else {
        Err(BrokerError::CommandFailed(format!("unexpected PING reply: {pong}").into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_accepts_url() {
        // Pool construction is lazy; no server is contacted here.
        assert!(create_pool("redis://127.0.0.1:6379").is_ok());
    }
}
