use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{BridgeError, Result};

/// Point-in-time read of every metric in a registry, keyed by name
pub type Snapshot = BTreeMap<String, AggregateState>;

/// Distribution summary of a histogram or timer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn new(count: u64, sum: f64, min: f64, max: f64) -> Self {
        Self {
            count,
            sum,
            min,
            max,
        }
    }

    /// Summary of a set of observed values
    pub fn of(values: &[f64]) -> Self {
        let mut summary = Self::new(0, 0.0, f64::INFINITY, f64::NEG_INFINITY);
        for value in values {
            summary.count += 1;
            summary.sum += value;
            summary.min = summary.min.min(*value);
            summary.max = summary.max.max(*value);
        }
        if summary.count == 0 {
            summary.min = 0.0;
            summary.max = 0.0;
        }
        summary
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Current aggregate state of one metric
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateState {
    Counter(u64),
    Gauge(f64),
    Meter { count: u64, mean_rate: f64 },
    Histogram(Summary),
    /// Durations in milliseconds
    Timer(Summary),
    /// The registry could not produce a value for this metric
    Unavailable(String),
}

impl AggregateState {
    pub fn kind(&self) -> &'static str {
        match self {
            AggregateState::Counter(_) => "counter",
            AggregateState::Gauge(_) => "gauge",
            AggregateState::Meter { .. } => "meter",
            AggregateState::Histogram(_) => "histogram",
            AggregateState::Timer(_) => "timer",
            AggregateState::Unavailable(_) => "unavailable",
        }
    }
}

/// A registry that can be snapshotted once per reporting cycle
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Read the current state of every metric
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Get the source name
    fn name(&self) -> &str;
}

/// A source serving a snapshot held in memory
pub struct StaticSource {
    snapshot: RwLock<Snapshot>,
    name: String,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_snapshot(name, Snapshot::new())
    }

    pub fn with_snapshot(name: impl Into<String>, snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            name: name.into(),
        }
    }

    /// Set the state of one metric
    pub fn set(&self, metric: impl Into<String>, state: AggregateState) -> Result<()> {
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| BridgeError::poisoned("static source"))?;
        snapshot.insert(metric.into(), state);
        Ok(())
    }

    /// Replace the whole snapshot
    pub fn replace(&self, new_snapshot: Snapshot) -> Result<()> {
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| BridgeError::poisoned("static source"))?;
        *snapshot = new_snapshot;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotSource for StaticSource {
    async fn snapshot(&self) -> Result<Snapshot> {
        let snapshot = self
            .snapshot
            .read()
            .map_err(|_| BridgeError::poisoned("static source"))?;
        Ok(snapshot.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
