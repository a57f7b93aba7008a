use async_trait::async_trait;
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{PublishOutcome, Publisher};
use crate::batcher::Batch;
use crate::error::{BridgeError, Result};
use crate::sample::MetricSample;

/// A publisher keeping every accepted batch in memory.
///
/// Outcomes can be scripted with [`MemoryPublisher::push_outcome`]; once the
/// script is exhausted every call succeeds.
pub struct MemoryPublisher {
    published: Mutex<Vec<Vec<MetricSample>>>,
    script: Mutex<VecDeque<PublishOutcome>>,
    calls: AtomicUsize,
    retain: bool,
    name: String,
}

impl MemoryPublisher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            retain: true,
            name: name.into(),
        }
    }

    /// A publisher that logs accepted batches without keeping them
    pub fn logging(name: impl Into<String>) -> Self {
        Self {
            retain: false,
            ..Self::new(name)
        }
    }

    /// Queue the outcome of a future call
    pub fn push_outcome(&self, outcome: PublishOutcome) -> Result<()> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| BridgeError::poisoned("publisher script"))?;
        script.push_back(outcome);
        Ok(())
    }

    /// Batches that were accepted, in call order
    pub fn published(&self) -> Result<Vec<Vec<MetricSample>>> {
        let published = self
            .published
            .lock()
            .map_err(|_| BridgeError::poisoned("published batches"))?;
        Ok(published.clone())
    }

    /// Number of publish calls made, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn record(&self, batch: &Batch) -> Result<PublishOutcome> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let outcome = self
            .script
            .lock()
            .map_err(|_| BridgeError::poisoned("publisher script"))?
            .pop_front()
            .unwrap_or(PublishOutcome::Success);

        if outcome == PublishOutcome::Success {
            info!(
                "[{}] batch {}: {} samples, {} bytes",
                self.name,
                batch.index,
                batch.len(),
                batch.serialized_size()
            );
            for sample in batch.samples() {
                debug!(
                    "[{}] {} {}={} {:?} at {}",
                    self.name,
                    sample.name(),
                    sample.statistic(),
                    sample.value(),
                    sample.unit(),
                    sample.timestamp()
                );
            }
            if !self.retain {
                return Ok(outcome);
            }
            self.published
                .lock()
                .map_err(|_| BridgeError::poisoned("published batches"))?
                .push(batch.samples().to_vec());
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, batch: &Batch) -> PublishOutcome {
        self.record(batch)
            .unwrap_or_else(|e| PublishOutcome::Fatal(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
