//! Stream consumer: pending recovery, then the live read loop.

use crate::writer::Writer;
use broker::{StreamConsumer, StreamEntry};
use common::model::Observation;
use errors::Result;
use log::{error, info, warn};
use metrics::counter;
use std::time::Duration;
use tokio::sync::broadcast;

const READ_BATCH: usize = 50;
const BLOCK_MS: usize = 5_000;
const BROKER_RETRY_PAUSE: Duration = Duration::from_secs(1);

pub struct Consumer {
    stream: StreamConsumer,
    writer: Writer,
}

impl Consumer {
    pub fn new(stream: StreamConsumer, writer: Writer) -> Self {
        Self { stream, writer }
    }

    /// Phase 1 replays this consumer's unacknowledged entries — anything
    /// delivered before a crash that never reached the store's buffer.
    /// Phase 2 then follows new entries until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        self.recover_pending(&mut shutdown).await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Consumer shutting down");
                    break;
                }
                read = self.stream.read_new(READ_BATCH, BLOCK_MS) => match read {
                    Ok(entries) => {
                        for entry in entries {
                            self.process(entry).await;
                        }
                    }
                    Err(e) => {
                        error!("Stream read failed: {e}");
                        tokio::time::sleep(BROKER_RETRY_PAUSE).await;
                    }
                }
            }
        }
    }

    async fn recover_pending(&self, shutdown: &mut broadcast::Receiver<()>) {
        info!(
            "Recovering pending entries for consumer {}",
            self.stream.consumer_name()
        );
        let mut replayed: u64 = 0;

        loop {
            if shutdown.try_recv().is_ok() {
                return;
            }
            match self.stream.read_pending(READ_BATCH).await {
                Ok(entries) if entries.is_empty() => break,
                Ok(entries) => {
                    replayed += entries.len() as u64;
                    for entry in entries {
                        self.process(entry).await;
                    }
                }
                Err(e) => {
                    error!("Pending read failed: {e}");
                    tokio::time::sleep(BROKER_RETRY_PAUSE).await;
                }
            }
        }

        counter!("consumer_recovered_total").increment(replayed);
        info!("Pending recovery complete: {replayed} entries replayed");
    }

    /// Acknowledge only after the writer durably accepted the point. A
    /// failure on either step leaves the entry pending so a later restart
    /// redelivers it; the store's timestamp dedup absorbs the duplicates.
    async fn process(&self, entry: StreamEntry) {
        let observation = match Observation::from_fields(&entry.fields) {
            Ok(obs) => obs,
            Err(e) => {
                error!("Entry {} rejected: {e}; left pending", entry.id);
                counter!("consumer_entries_total", "result" => "rejected").increment(1);
                return;
            }
        };

        match self.writer.write(&observation) {
            Ok(()) => {
                if let Err(e) = self.stream.ack(&entry.id).await {
                    // The write happened; redelivery will be deduplicated.
                    warn!("Ack for {} failed: {e}", entry.id);
                    counter!("consumer_entries_total", "result" => "ack_failed").increment(1);
                } else {
                    counter!("consumer_entries_total", "result" => "ok").increment(1);
                }
            }
            Err(e) => {
                error!(
                    "Writer rejected point for entry {}: {e}; left pending",
                    entry.id
                );
                counter!("consumer_entries_total", "result" => "write_failed").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_parameters_match_contract() {
        assert_eq!(READ_BATCH, 50);
        assert_eq!(BLOCK_MS, 5_000);
    }
}
