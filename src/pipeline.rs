//! One collect → translate → batch → publish cycle
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batcher::{Batch, Batcher};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::retry::{AbandonReason, RetryController, RetryState};
use crate::source::SnapshotSource;
use crate::stats::ExportStats;
use crate::transformer::SampleTranslator;

/// Run state of a single reporting cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingCycle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub samples_translated: u64,
    pub samples_dropped: u64,
    /// Stale, zero-valued or malformed
    pub samples_skipped: u64,
    pub samples_oversized: u64,
    pub batches_attempted: u64,
    pub batches_succeeded: u64,
    pub batches_abandoned: u64,
    pub samples_lost: u64,
}

impl ReportingCycle {
    fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            samples_translated: 0,
            samples_dropped: 0,
            samples_skipped: 0,
            samples_oversized: 0,
            batches_attempted: 0,
            batches_succeeded: 0,
            batches_abandoned: 0,
            samples_lost: 0,
        }
    }
}

/// Settlement of one cycle's batches.
///
/// Dropping a ledger that was never closed means the cycle was aborted;
/// every batch it had not settled is then counted as abandoned.
struct CycleLedger<'a> {
    stats: &'a ExportStats,
    cycle: Uuid,
    batches: u64,
    samples: u64,
    dispatched: AtomicU64,
    settled_batches: AtomicU64,
    settled_samples: AtomicU64,
    closed: bool,
}

impl<'a> CycleLedger<'a> {
    fn open(stats: &'a ExportStats, cycle: Uuid, batches: &[Batch]) -> Self {
        Self {
            stats,
            cycle,
            batches: batches.len() as u64,
            samples: batches.iter().map(|b| b.len() as u64).sum(),
            dispatched: AtomicU64::new(0),
            settled_batches: AtomicU64::new(0),
            settled_samples: AtomicU64::new(0),
            closed: false,
        }
    }

    fn dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn settle(&self, samples: usize) {
        self.settled_batches.fetch_add(1, Ordering::Relaxed);
        self.settled_samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    fn close(mut self) {
        self.closed = true;
    }
}

impl Drop for CycleLedger<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let undispatched = self.batches - self.dispatched.load(Ordering::Relaxed);
        let unsettled = self.batches - self.settled_batches.load(Ordering::Relaxed);
        let lost = self.samples - self.settled_samples.load(Ordering::Relaxed);

        ExportStats::add(&self.stats.batches_attempted, undispatched);
        ExportStats::add(&self.stats.batches_abandoned_retryable, unsettled);
        ExportStats::add(&self.stats.samples_lost, lost);
        ExportStats::incr(&self.stats.cycles_failed);
        warn!(
            "Cycle {} aborted: {} batches ({} samples) abandoned",
            self.cycle, unsettled, lost
        );
    }
}

/// Final state of one batch
#[derive(Debug, Clone, Copy, PartialEq)]
enum BatchFate {
    Delivered,
    Abandoned,
}

/// Executes reporting cycles against a source and a publisher
pub struct Exporter {
    source: Arc<dyn SnapshotSource>,
    translator: SampleTranslator,
    batcher: Batcher,
    publisher: Arc<dyn Publisher>,
    retry: RetryController,
    max_concurrency: usize,
    stats: Arc<ExportStats>,
}

impl Exporter {
    pub fn new(
        config: &BridgeConfig,
        source: Arc<dyn SnapshotSource>,
        publisher: Arc<dyn Publisher>,
        stats: Arc<ExportStats>,
    ) -> Result<Self> {
        Ok(Self {
            source,
            translator: SampleTranslator::from_config(config)?,
            batcher: Batcher::new(&config.namespace, &config.limits),
            publisher,
            retry: RetryController::new(&config.retry),
            max_concurrency: config.max_concurrency.max(1),
            stats,
        })
    }

    pub fn stats(&self) -> &Arc<ExportStats> {
        &self.stats
    }

    /// Run one full cycle.
    ///
    /// Fails only when the snapshot cannot be taken; every sample- and
    /// batch-level problem is logged and counted instead. Cancelling
    /// `cancel` stops dispatching new batches and abandons pending retries.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<ReportingCycle> {
        let mut cycle = ReportingCycle::begin();
        ExportStats::incr(&self.stats.cycles_started);
        debug!("Cycle {} started", cycle.id);

        let snapshot = match self.source.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                ExportStats::incr(&self.stats.cycles_failed);
                error!(
                    "Cycle {} skipped, snapshot of {} failed: {}",
                    cycle.id,
                    self.source.name(),
                    e
                );
                return Err(BridgeError::Source(e.to_string()));
            }
        };

        let translation = self.translator.translate(&snapshot, cycle.started_at);
        cycle.samples_translated = translation.samples.len() as u64;
        cycle.samples_dropped = translation.dropped;
        cycle.samples_skipped = translation.stale + translation.zero_skipped + translation.malformed;
        ExportStats::add(&self.stats.samples_translated, cycle.samples_translated);
        ExportStats::add(&self.stats.samples_dropped, translation.dropped);
        ExportStats::add(&self.stats.samples_stale, translation.stale);
        ExportStats::add(&self.stats.samples_zero_skipped, translation.zero_skipped);
        ExportStats::add(&self.stats.samples_malformed, translation.malformed);

        let plan = self.batcher.partition(translation.samples);
        cycle.samples_oversized = plan.oversized;
        ExportStats::add(&self.stats.samples_oversized, plan.oversized);

        let ledger = CycleLedger::open(&self.stats, cycle.id, &plan.batches);
        let fates: Vec<(BatchFate, usize)> = stream::iter(plan.batches)
            .map(|batch| {
                let ledger = &ledger;
                async move {
                    ledger.dispatch();
                    let fate = self.deliver(&batch, cancel).await;
                    ledger.settle(batch.len());
                    (fate, batch.len())
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        ledger.close();

        for (fate, samples) in fates {
            cycle.batches_attempted += 1;
            match fate {
                BatchFate::Delivered => cycle.batches_succeeded += 1,
                BatchFate::Abandoned => {
                    cycle.batches_abandoned += 1;
                    cycle.samples_lost += samples as u64;
                }
            }
        }

        ExportStats::incr(&self.stats.cycles_completed);
        info!(
            "Cycle {} finished: {} samples, {}/{} batches delivered, {} samples lost",
            cycle.id,
            cycle.samples_translated,
            cycle.batches_succeeded,
            cycle.batches_attempted,
            cycle.samples_lost
        );
        Ok(cycle)
    }

    /// Publish one batch through the retry controller
    async fn deliver(&self, batch: &Batch, cancel: &CancellationToken) -> BatchFate {
        ExportStats::incr(&self.stats.batches_attempted);

        let state = if cancel.is_cancelled() {
            RetryState::Abandoned {
                attempts: 0,
                reason: AbandonReason::Cancelled,
            }
        } else {
            let publisher = &self.publisher;
            let stats = &self.stats;
            let context = format!("put_metric_data batch {}", batch.index);
            let report = self
                .retry
                .run(
                    move |_attempt| {
                        ExportStats::incr(&stats.publish_attempts);
                        publisher.publish(batch)
                    },
                    cancel,
                    &context,
                )
                .await;
            ExportStats::add(&self.stats.backoff_waits, report.waits.len() as u64);
            report.state
        };

        match state {
            RetryState::Succeeded { attempts } => {
                debug!(
                    "Batch {} ({} samples) delivered after {} attempt(s)",
                    batch.index,
                    batch.len(),
                    attempts
                );
                ExportStats::incr(&self.stats.batches_succeeded);
                BatchFate::Delivered
            }
            RetryState::Abandoned { attempts, reason } => {
                ExportStats::add(&self.stats.samples_lost, batch.len() as u64);
                match reason {
                    AbandonReason::Fatal(message) => {
                        ExportStats::incr(&self.stats.batches_abandoned_fatal);
                        error!(
                            "Batch {} ({} samples) rejected by {}: {}",
                            batch.index,
                            batch.len(),
                            self.publisher.name(),
                            message
                        );
                    }
                    AbandonReason::Exhausted(message) => {
                        ExportStats::incr(&self.stats.batches_abandoned_retryable);
                        error!(
                            "Batch {} ({} samples) lost, retries exhausted after {} attempts: {}",
                            batch.index,
                            batch.len(),
                            attempts,
                            message
                        );
                    }
                    AbandonReason::Cancelled => {
                        ExportStats::incr(&self.stats.batches_abandoned_retryable);
                        warn!(
                            "Batch {} ({} samples) abandoned on shutdown after {} attempt(s)",
                            batch.index,
                            batch.len(),
                            attempts
                        );
                    }
                }
                BatchFate::Abandoned
            }
            // the controller only returns terminal states
            RetryState::Attempting { .. } | RetryState::Waiting { .. } => BatchFate::Abandoned,
        }
    }
}
