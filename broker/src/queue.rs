//! Cycle metadata and the per-cycle work queue.

use common::keys;
use common::model::Location;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::Pool;
use errors::{BrokerError, Result};
use log::debug;
use metrics::gauge;
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot of the cycle counters, read together so a worker never pairs a
/// new cycle id with the previous start timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleInfo {
    pub id: u64,
    pub start_ms: u64,
}

#[derive(Clone)]
pub struct WorkQueue {
    pool: Pool,
}

impl WorkQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Starts a new cycle: bump the counter, stamp the start time, drop
    /// whatever the previous cycle left behind, and push the full catalog.
    ///
    /// Issued as one MULTI/EXEC block so workers never observe a
    /// half-refreshed queue. Residual jobs are deliberately discarded — a
    /// location skipped for one minute beats an ever-growing backlog.
    pub async fn refresh_cycle(&self, locations: &[Location]) -> Result<CycleInfo> {
        let mut payloads = Vec::with_capacity(locations.len());
        for location in locations {
            payloads.push(location.to_job()?);
        }

        let start_ms = now_ms();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.into()))?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .incr(keys::CYCLE_ID, 1u64)
            .set(keys::CYCLE_START_MS, start_ms)
            .ignore()
            .del(keys::LOCATIONS_QUEUE)
            .ignore()
            .lpush(keys::LOCATIONS_QUEUE, payloads)
            .ignore();

        let (id,): (u64,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::PipelineFailed(e.into()))?;

        gauge!("queue_len").set(locations.len() as f64);
        debug!(
            "Cycle {id} enqueued {} locations at {start_ms}",
            locations.len()
        );
        Ok(CycleInfo { id, start_ms })
    }

    /// Blocking pop with a bounded wait; `None` on timeout.
    pub async fn pop(&self, timeout_secs: f64) -> Result<Option<Location>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.into()))?;

        let popped: Option<(String, String)> = conn
            .brpop(keys::LOCATIONS_QUEUE, timeout_secs)
            .await
            .map_err(|e| BrokerError::CommandFailed(e.into()))?;

        match popped {
            None => Ok(None),
            Some((_, payload)) => Ok(Some(Location::from_job(&payload)?)),
        }
    }

    /// Current cycle counters; `None` before the first cycle ran.
    pub async fn current_cycle(&self) -> Result<Option<CycleInfo>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.into()))?;

        let (id, start_ms): (Option<u64>, Option<u64>) = conn
            .mget((keys::CYCLE_ID, keys::CYCLE_START_MS))
            .await
            .map_err(|e| BrokerError::CommandFailed(e.into()))?;

        Ok(match (id, start_ms) {
            (Some(id), Some(start_ms)) => Some(CycleInfo { id, start_ms }),
            _ => None,
        })
    }

    pub async fn len(&self) -> Result<u64> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.into()))?;

        conn.llen(keys::LOCATIONS_QUEUE)
            .await
            .map_err(|e| BrokerError::CommandFailed(e.into()).into())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_info_equality() {
        let a = CycleInfo {
            id: 3,
            start_ms: 1000,
        };
        assert_eq!(
            a,
            CycleInfo {
                id: 3,
                start_ms: 1000
            }
        );
        assert_ne!(
            a,
            CycleInfo {
                id: 4,
                start_ms: 1000
            }
        );
    }

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
