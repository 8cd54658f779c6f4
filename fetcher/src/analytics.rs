//! Per-second cycle analytics.
//!
//! Workers record fetch outcomes into (cycle, second-offset) buckets; a
//! 500 ms reporter drains each second once it has fully closed and emits a
//! single summary line. Buckets are per-process only — nothing here crosses
//! the broker.

use broker::CycleInfo;
use dashmap::DashMap;
use log::info;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex};

const REPORT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
    Timeout,
}

#[derive(Debug, Default, Clone)]
pub struct SecondBucket {
    pub ok: u64,
    pub fail: u64,
    pub timeout: u64,
    pub latencies_ms: Vec<u64>,
}

impl SecondBucket {
    pub fn total(&self) -> u64 {
        self.ok + self.fail + self.timeout
    }
}

pub struct Analytics {
    buckets: DashMap<(u64, u64), SecondBucket>,
    cycle: Mutex<Option<CycleInfo>>,
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            cycle: Mutex::new(None),
        }
    }

    /// Called by whoever observes a cycle boundary (scheduler on enqueue,
    /// workers on a cycle-id mismatch).
    pub async fn observe_cycle(&self, info: CycleInfo) {
        let mut cycle = self.cycle.lock().await;
        match *cycle {
            Some(current) if current.id >= info.id => {}
            _ => *cycle = Some(info),
        }
    }

    pub async fn current_cycle(&self) -> Option<CycleInfo> {
        *self.cycle.lock().await
    }

    pub fn record(&self, cycle_id: u64, second: u64, outcome: Outcome, latency_ms: Option<u64>) {
        let mut bucket = self.buckets.entry((cycle_id, second)).or_default();
        match outcome {
            Outcome::Success => bucket.ok += 1,
            Outcome::Fail => bucket.fail += 1,
            Outcome::Timeout => bucket.timeout += 1,
        }
        if let Some(latency) = latency_ms {
            bucket.latencies_ms.push(latency);
        }
    }

    /// Removes and returns the bucket for one closed second.
    pub fn drain(&self, cycle_id: u64, second: u64) -> SecondBucket {
        self.buckets
            .remove(&(cycle_id, second))
            .map(|(_, bucket)| bucket)
            .unwrap_or_default()
    }

    /// Drops buckets that belong to cycles before `cycle_id`.
    pub fn evict_before(&self, cycle_id: u64) {
        self.buckets.retain(|(cycle, _), _| *cycle >= cycle_id);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Reporter loop; one summary line per closed second.
    pub async fn run_reporter(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(REPORT_INTERVAL);
        let mut reported_cycle: Option<u64> = None;
        let mut reported_second: Option<u64> = None;
        let mut cum_ok: u64 = 0;
        let mut cum_total: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Analytics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(cycle) = self.current_cycle().await else {
                        continue;
                    };

                    if reported_cycle != Some(cycle.id) {
                        reported_cycle = Some(cycle.id);
                        reported_second = None;
                        cum_ok = 0;
                        cum_total = 0;
                        self.evict_before(cycle.id);
                    }

                    let now = now_ms();
                    if now <= cycle.start_ms {
                        continue;
                    }
                    let elapsed_secs = (now - cycle.start_ms) / 1000;
                    if elapsed_secs == 0 {
                        continue;
                    }
                    // Report the second that just closed, not the live one.
                    let completed = elapsed_secs - 1;
                    if reported_second == Some(completed) {
                        continue;
                    }
                    reported_second = Some(completed);

                    let bucket = self.drain(cycle.id, completed);
                    cum_ok += bucket.ok;
                    cum_total += bucket.total();

                    let avg = average_ms(&bucket.latencies_ms);
                    let p99 = p99_ms(&bucket.latencies_ms);
                    info!(
                        "cycle {} sec {}: ok={} fail={} timeout={} cycle_ok={}/{} avg={:.1}ms p99={}ms",
                        cycle.id,
                        completed,
                        bucket.ok,
                        bucket.fail,
                        bucket.timeout,
                        cum_ok,
                        cum_total,
                        avg,
                        p99
                    );

                    counter!("fetch_reported_total", "outcome" => "ok").increment(bucket.ok);
                    counter!("fetch_reported_total", "outcome" => "fail").increment(bucket.fail);
                    counter!("fetch_reported_total", "outcome" => "timeout").increment(bucket.timeout);
                    gauge!("fetch_latency_p99_ms").set(p99 as f64);
                }
            }
        }
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn average_ms(latencies: &[u64]) -> f64 {
    if latencies.is_empty() {
        return 0.0;
    }
    latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
}

fn p99_ms(latencies: &[u64]) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.99).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_drain() {
        let analytics = Analytics::new();
        analytics.record(1, 3, Outcome::Success, Some(120));
        analytics.record(1, 3, Outcome::Success, Some(80));
        analytics.record(1, 3, Outcome::Fail, None);
        analytics.record(1, 3, Outcome::Timeout, None);

        let bucket = analytics.drain(1, 3);
        assert_eq!(bucket.ok, 2);
        assert_eq!(bucket.fail, 1);
        assert_eq!(bucket.timeout, 1);
        assert_eq!(bucket.total(), 4);
        assert_eq!(bucket.latencies_ms, vec![120, 80]);

        // Draining is destructive.
        assert_eq!(analytics.drain(1, 3).total(), 0);
    }

    #[tokio::test]
    async fn test_observe_cycle_never_regresses() {
        let analytics = Analytics::new();
        analytics.observe_cycle(CycleInfo { id: 5, start_ms: 50 }).await;
        analytics.observe_cycle(CycleInfo { id: 4, start_ms: 40 }).await;
        assert_eq!(analytics.current_cycle().await.unwrap().id, 5);
        analytics.observe_cycle(CycleInfo { id: 6, start_ms: 60 }).await;
        assert_eq!(analytics.current_cycle().await.unwrap().id, 6);
    }

    #[test]
    fn test_eviction_drops_past_cycles_only() {
        let analytics = Analytics::new();
        analytics.record(1, 0, Outcome::Success, None);
        analytics.record(2, 0, Outcome::Success, None);
        analytics.record(3, 0, Outcome::Success, None);
        analytics.evict_before(3);
        assert_eq!(analytics.bucket_count(), 1);
        assert_eq!(analytics.drain(3, 0).ok, 1);
    }

    #[test]
    fn test_average() {
        assert_eq!(average_ms(&[]), 0.0);
        assert_eq!(average_ms(&[100, 200]), 150.0);
    }

    #[test]
    fn test_p99() {
        assert_eq!(p99_ms(&[]), 0);
        assert_eq!(p99_ms(&[42]), 42);
        let ascending: Vec<u64> = (1..=100).collect();
        assert_eq!(p99_ms(&ascending), 99);
        let pair = vec![10, 1000];
        assert_eq!(p99_ms(&pair), 1000);
    }
}
