//! The fetch worker pool.
//!
//! Every worker runs the same loop: pop a job, sync the cycle cache,
//! acquire a token, fetch, append to the stream, record the outcome. Jobs
//! are never re-enqueued — a failed location waits for the next cycle.

use crate::analytics::{Analytics, Outcome};
use crate::client::WeatherFetcher;
use broker::{CycleInfo, RateLimiter, StreamProducer, WorkQueue};
use log::{error, info, warn};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const POP_TIMEOUT_SECS: f64 = 5.0;
const BROKER_RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct WorkerPool {
    queue: WorkQueue,
    limiter: RateLimiter,
    producer: StreamProducer,
    fetcher: Arc<dyn WeatherFetcher>,
    analytics: Arc<Analytics>,
}

impl WorkerPool {
    pub fn new(
        queue: WorkQueue,
        limiter: RateLimiter,
        producer: StreamProducer,
        fetcher: Arc<dyn WeatherFetcher>,
        analytics: Arc<Analytics>,
    ) -> Self {
        Self {
            queue,
            limiter,
            producer,
            fetcher,
            analytics,
        }
    }

    pub fn spawn(&self, count: usize, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!("Starting {count} fetch workers");
        (0..count)
            .map(|id| {
                let pool = self.clone();
                let rx = shutdown.subscribe();
                tokio::spawn(pool.run_worker(id, rx))
            })
            .collect()
    }

    async fn run_worker(self, id: usize, mut shutdown: broadcast::Receiver<()>) {
        let mut cached_cycle: Option<CycleInfo> = None;

        loop {
            let location = tokio::select! {
                _ = shutdown.recv() => break,
                popped = self.queue.pop(POP_TIMEOUT_SECS) => match popped {
                    Ok(Some(location)) => location,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Worker {id}: queue pop failed: {e}");
                        tokio::time::sleep(BROKER_RETRY_PAUSE).await;
                        continue;
                    }
                }
            };

            self.refresh_cycle_cache(id, &mut cached_cycle).await;
            let cycle = cached_cycle.unwrap_or(CycleInfo {
                id: 0,
                start_ms: now_ms(),
            });

            // A token must be held before the request leaves the process.
            if let Err(e) = self.limiter.acquire().await {
                error!("Worker {id}: token acquire failed, dropping job: {e}");
                counter!("fetch_total", "outcome" => "acquire_error").increment(1);
                continue;
            }

            let fetch_start = now_ms();
            let second = second_offset(fetch_start, cycle.start_ms);

            match self.fetcher.fetch(&location).await {
                Ok(observation) => {
                    let latency = now_ms().saturating_sub(fetch_start);
                    match self.producer.append(&observation).await {
                        Ok(_) => {
                            self.analytics
                                .record(cycle.id, second, Outcome::Success, Some(latency));
                            counter!("fetch_total", "outcome" => "ok").increment(1);
                            histogram!("fetch_duration_ms").record(latency as f64);
                        }
                        Err(e) => {
                            warn!(
                                "Worker {id}: stream append for {} failed: {e}",
                                location.city_name
                            );
                            self.analytics.record(cycle.id, second, Outcome::Fail, None);
                            counter!("fetch_total", "outcome" => "append_error").increment(1);
                        }
                    }
                }
                Err(e) if e.is_throttled() => {
                    warn!("Worker {id}: upstream throttled on {}", location.city_name);
                    self.analytics.record(cycle.id, second, Outcome::Fail, None);
                    counter!("fetch_total", "outcome" => "throttled").increment(1);
                    if let Err(notify_err) = self.limiter.notify_throttled().await {
                        warn!("Worker {id}: cooldown install failed: {notify_err}");
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!("Worker {id}: fetch timeout on {}", location.city_name);
                    self.analytics
                        .record(cycle.id, second, Outcome::Timeout, None);
                    counter!("fetch_total", "outcome" => "timeout").increment(1);
                }
                Err(e) => {
                    warn!("Worker {id}: fetch for {} failed: {e}", location.city_name);
                    self.analytics.record(cycle.id, second, Outcome::Fail, None);
                    counter!("fetch_total", "outcome" => "fail").increment(1);
                }
            }
        }
    }

    /// Syncs the worker's (cycle id, start) cache. Both values come from
    /// one MGET so the pair can be swapped atomically on a boundary.
    async fn refresh_cycle_cache(&self, id: usize, cached: &mut Option<CycleInfo>) {
        match self.queue.current_cycle().await {
            Ok(Some(info)) => {
                if cached.map(|c| c.id) != Some(info.id) {
                    *cached = Some(info);
                    self.analytics.observe_cycle(info).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Keep the cached pair; analytics attribution degrades, the
                // fetch itself does not.
                warn!("Worker {id}: cycle read failed: {e}");
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

/// Second bucket a fetch started in, relative to its cycle start.
fn second_offset(fetch_start_ms: u64, cycle_start_ms: u64) -> u64 {
    fetch_start_ms.saturating_sub(cycle_start_ms) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_offset() {
        assert_eq!(second_offset(1_000, 1_000), 0);
        assert_eq!(second_offset(1_999, 1_000), 0);
        assert_eq!(second_offset(2_000, 1_000), 1);
        assert_eq!(second_offset(61_500, 1_000), 60);
        // A clock step backwards must not underflow.
        assert_eq!(second_offset(500, 1_000), 0);
    }
}
