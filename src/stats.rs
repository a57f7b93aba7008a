//! Cumulative counters describing the exporter's own behaviour
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::source::{AggregateState, Snapshot, SnapshotSource};

/// Prefix of the metric names under which the counters are exposed
pub const STATS_PREFIX: &str = "cloudwatch_bridge";

/// Counters shared by every component of the exporter
#[derive(Debug, Default)]
pub struct ExportStats {
    pub cycles_started: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub cycles_skipped: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub samples_translated: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub samples_stale: AtomicU64,
    pub samples_zero_skipped: AtomicU64,
    pub samples_malformed: AtomicU64,
    pub samples_oversized: AtomicU64,
    pub samples_lost: AtomicU64,
    pub batches_attempted: AtomicU64,
    pub batches_succeeded: AtomicU64,
    pub batches_abandoned_retryable: AtomicU64,
    pub batches_abandoned_fatal: AtomicU64,
    pub publish_attempts: AtomicU64,
    pub backoff_waits: AtomicU64,
}

/// Point-in-time copy of [`ExportStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub samples_translated: u64,
    pub samples_dropped: u64,
    pub samples_stale: u64,
    pub samples_zero_skipped: u64,
    pub samples_malformed: u64,
    pub samples_oversized: u64,
    pub samples_lost: u64,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub batches_abandoned_retryable: u64,
    pub batches_abandoned_fatal: u64,
    pub publish_attempts: u64,
    pub backoff_waits: u64,
}

impl ExportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            cycles_started: get(&self.cycles_started),
            cycles_completed: get(&self.cycles_completed),
            cycles_skipped: get(&self.cycles_skipped),
            cycles_failed: get(&self.cycles_failed),
            samples_translated: get(&self.samples_translated),
            samples_dropped: get(&self.samples_dropped),
            samples_stale: get(&self.samples_stale),
            samples_zero_skipped: get(&self.samples_zero_skipped),
            samples_malformed: get(&self.samples_malformed),
            samples_oversized: get(&self.samples_oversized),
            samples_lost: get(&self.samples_lost),
            batches_attempted: get(&self.batches_attempted),
            batches_succeeded: get(&self.batches_succeeded),
            batches_abandoned_retryable: get(&self.batches_abandoned_retryable),
            batches_abandoned_fatal: get(&self.batches_abandoned_fatal),
            publish_attempts: get(&self.publish_attempts),
            backoff_waits: get(&self.backoff_waits),
        }
    }
}

impl StatsSnapshot {
    /// Counters as `(name, value)` pairs
    pub fn counters(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("cycles_started", self.cycles_started),
            ("cycles_completed", self.cycles_completed),
            ("cycles_skipped", self.cycles_skipped),
            ("cycles_failed", self.cycles_failed),
            ("samples_translated", self.samples_translated),
            ("samples_dropped", self.samples_dropped),
            ("samples_stale", self.samples_stale),
            ("samples_zero_skipped", self.samples_zero_skipped),
            ("samples_malformed", self.samples_malformed),
            ("samples_oversized", self.samples_oversized),
            ("samples_lost", self.samples_lost),
            ("batches_attempted", self.batches_attempted),
            ("batches_succeeded", self.batches_succeeded),
            ("batches_abandoned_retryable", self.batches_abandoned_retryable),
            ("batches_abandoned_fatal", self.batches_abandoned_fatal),
            ("publish_attempts", self.publish_attempts),
            ("backoff_waits", self.backoff_waits),
        ]
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ExportStats {
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(ExportStats::snapshot(self)
            .counters()
            .into_iter()
            .map(|(name, value)| {
                (
                    format!("{}.{}", STATS_PREFIX, name),
                    AggregateState::Counter(value),
                )
            })
            .collect())
    }

    fn name(&self) -> &str {
        STATS_PREFIX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(ExportStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        ExportStats::incr(&stats.batches_attempted);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().batches_attempted, 8000);
    }

    #[tokio::test]
    async fn test_stats_as_snapshot_source() {
        let stats = ExportStats::new();
        ExportStats::add(&stats.samples_translated, 3);

        let snapshot = SnapshotSource::snapshot(&stats).await.unwrap();
        assert_eq!(snapshot.len(), 17);
        assert_eq!(
            snapshot["cloudwatch_bridge.samples_translated"],
            AggregateState::Counter(3)
        );
    }
}
