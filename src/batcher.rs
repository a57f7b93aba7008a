//! Partitioning of samples into request-sized batches
use log::{debug, error};
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::sample::{MetricSample, PutMetricDataRequest};

/// Widest recency window accepted in either direction, ten years
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Limits imposed by the backend on a single call and on each sample
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BatchLimits {
    /// Maximum number of samples per call
    pub max_items_per_call: usize,
    /// Maximum request body size in bytes
    pub max_payload_bytes: usize,
    /// Maximum dimensions per sample, statistic included
    pub max_dimensions: usize,
    /// Oldest sample the backend accepts, in seconds
    pub max_sample_age_secs: u64,
    /// How far in the future a sample may lie, in seconds
    pub max_clock_skew_secs: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items_per_call: 1000,
            max_payload_bytes: 1_000_000,
            max_dimensions: 30,
            max_sample_age_secs: 14 * 24 * 60 * 60,
            max_clock_skew_secs: 2 * 60 * 60,
        }
    }
}

impl BatchLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_items_per_call == 0 {
            return Err(BridgeError::Config(
                "limits.max_items_per_call must be at least 1".to_string(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(BridgeError::Config(
                "limits.max_payload_bytes must be at least 1".to_string(),
            ));
        }
        if self.max_dimensions == 0 {
            return Err(BridgeError::Config(
                "limits.max_dimensions must leave room for the statistic dimension".to_string(),
            ));
        }
        for (field, secs) in [
            ("limits.max_sample_age_secs", self.max_sample_age_secs),
            ("limits.max_clock_skew_secs", self.max_clock_skew_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(BridgeError::Config(format!(
                    "{} must not exceed {}, got {}",
                    field, MAX_WINDOW_SECS, secs
                )));
            }
        }
        Ok(())
    }
}

/// Samples sent together in one call
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position of the batch within its cycle
    pub index: usize,
    samples: Vec<MetricSample>,
    size: usize,
}

impl Batch {
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size of the request body carrying this batch
    pub fn serialized_size(&self) -> usize {
        self.size
    }
}

/// Result of partitioning one cycle's samples
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Samples too large to be sent on their own
    pub oversized: u64,
}

/// Greedy, order-preserving packer
#[derive(Debug, Clone)]
pub struct Batcher {
    max_items: usize,
    max_bytes: usize,
    envelope: usize,
}

impl Batcher {
    pub fn new(namespace: &str, limits: &BatchLimits) -> Self {
        Self {
            max_items: limits.max_items_per_call.max(1),
            max_bytes: limits.max_payload_bytes,
            envelope: PutMetricDataRequest::envelope_size(namespace),
        }
    }

    /// Split `samples` into batches that each respect both limits.
    ///
    /// Samples keep their input order; a batch is closed as soon as the
    /// next sample would push it over either limit.
    pub fn partition(&self, samples: Vec<MetricSample>) -> BatchPlan {
        let mut plan = BatchPlan::default();
        let mut current: Vec<MetricSample> = Vec::new();
        let mut current_size = self.envelope;

        for sample in samples {
            let sample_size = sample.serialized_size();

            if self.envelope.saturating_add(sample_size) > self.max_bytes {
                error!(
                    "Dropping {} {}: {} bytes exceeds the payload limit of {} bytes",
                    sample.name(),
                    sample.statistic(),
                    sample_size,
                    self.max_bytes
                );
                plan.oversized += 1;
                continue;
            }

            // entries after the first are preceded by a comma
            let added = if current.is_empty() { sample_size } else { sample_size + 1 };

            if !current.is_empty()
                && (current.len() >= self.max_items || current_size + added > self.max_bytes)
            {
                self.close(&mut plan, std::mem::take(&mut current), current_size);
                current_size = self.envelope;
                current_size += sample_size;
            } else {
                current_size += added;
            }
            current.push(sample);
        }

        if !current.is_empty() {
            self.close(&mut plan, current, current_size);
        }

        debug!(
            "Partitioned samples into {} batches ({} oversized)",
            plan.batches.len(),
            plan.oversized
        );
        plan
    }

    fn close(&self, plan: &mut BatchPlan, samples: Vec<MetricSample>, size: usize) {
        plan.batches.push(Batch {
            index: plan.batches.len(),
            samples,
            size,
        });
    }
}
