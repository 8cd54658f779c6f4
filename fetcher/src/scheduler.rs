//! Cycle scheduler: one full catalog enqueue per minute.

use crate::analytics::Analytics;
use broker::WorkQueue;
use common::model::Location;
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

pub struct Scheduler {
    queue: WorkQueue,
    analytics: Arc<Analytics>,
    locations: &'static [Location],
}

impl Scheduler {
    pub fn new(
        queue: WorkQueue,
        analytics: Arc<Analytics>,
        locations: &'static [Location],
    ) -> Self {
        Self {
            queue,
            analytics,
            locations,
        }
    }

    /// Enqueues immediately, then on every wall-clock minute boundary until
    /// shutdown. Enqueue failures are logged and skipped; the next boundary
    /// tries again.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        self.enqueue_cycle().await;

        loop {
            let wait = Duration::from_millis(millis_until_next_minute(now_ms()));
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    self.enqueue_cycle().await;
                }
            }
        }
    }

    async fn enqueue_cycle(&self) {
        match self.queue.refresh_cycle(self.locations).await {
            Ok(info) => {
                self.analytics.observe_cycle(info).await;
                info!(
                    "Cycle {} started: {} locations enqueued",
                    info.id,
                    self.locations.len()
                );
            }
            Err(e) => {
                error!("Cycle enqueue failed: {e}");
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Milliseconds until the next wall-clock minute boundary.
fn millis_until_next_minute(now_ms: u64) -> u64 {
    60_000 - (now_ms % 60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_until_next_minute() {
        assert_eq!(millis_until_next_minute(0), 60_000);
        assert_eq!(millis_until_next_minute(1), 59_999);
        assert_eq!(millis_until_next_minute(59_999), 1);
        assert_eq!(millis_until_next_minute(120_500), 59_500);
    }

    #[test]
    fn test_boundary_always_in_future() {
        for now in [0u64, 123, 59_999, 60_000, 61_000, 3_599_999] {
            let wait = millis_until_next_minute(now);
            assert!(wait >= 1 && wait <= 60_000);
            assert_eq!((now + wait) % 60_000, 0);
        }
    }
}
