//! Samples ready for export and their wire encoding
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{BridgeError, Result};

/// Dimension carrying the statistic of a sample on the wire
pub const STATISTIC_DIMENSION: &str = "Statistic";

/// Which aggregate a sample represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Value,
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Value => "value",
            Statistic::Count => "count",
            Statistic::Sum => "sum",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Average => "average",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units understood by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Count,
    Milliseconds,
    Seconds,
    Bytes,
    Percent,
    #[serde(rename = "Count/Second")]
    CountPerSecond,
    None,
}

/// A key/value tag attached to a sample
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Dimension {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Dimensions of a sample, unique by key and sorted by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions(Vec<Dimension>);

impl Dimensions {
    /// Build a dimension set holding at most `cap` entries
    pub fn new(dimensions: impl IntoIterator<Item = Dimension>, cap: usize) -> Result<Self> {
        let mut dimensions: Vec<Dimension> = dimensions.into_iter().collect();

        let mut seen = HashSet::new();
        for dimension in &dimensions {
            if dimension.name == STATISTIC_DIMENSION {
                return Err(BridgeError::Sample(format!(
                    "dimension key '{}' is reserved",
                    STATISTIC_DIMENSION
                )));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(BridgeError::Sample(format!(
                    "duplicate dimension key '{}'",
                    dimension.name
                )));
            }
        }

        if dimensions.len() > cap {
            return Err(BridgeError::Sample(format!(
                "{} dimensions exceed the maximum of {}",
                dimensions.len(),
                cap
            )));
        }

        dimensions.sort();
        Ok(Self(dimensions))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One measurement ready for export
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    name: String,
    statistic: Statistic,
    value: f64,
    unit: Unit,
    timestamp: DateTime<Utc>,
    dimensions: Dimensions,
}

impl MetricSample {
    /// Create a sample, rejecting empty names and non-finite values
    pub fn new(
        name: impl Into<String>,
        statistic: Statistic,
        value: f64,
        unit: Unit,
        timestamp: DateTime<Utc>,
        dimensions: Dimensions,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BridgeError::Sample("metric name must not be empty".to_string()));
        }
        if !value.is_finite() {
            return Err(BridgeError::Sample(format!(
                "{} {} is not finite: {}",
                name, statistic, value
            )));
        }

        Ok(Self {
            name,
            statistic,
            value,
            unit,
            timestamp,
            dimensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Wire representation of this sample
    pub fn to_datum(&self) -> MetricDatum<'_> {
        let mut dimensions: Vec<WireDimension<'_>> = self
            .dimensions
            .iter()
            .map(|d| WireDimension {
                name: &d.name,
                value: &d.value,
            })
            .collect();
        dimensions.push(WireDimension {
            name: STATISTIC_DIMENSION,
            value: self.statistic.as_str(),
        });

        MetricDatum {
            metric_name: &self.name,
            dimensions,
            timestamp: self.timestamp.timestamp_millis() as f64 / 1000.0,
            value: self.value,
            unit: self.unit,
        }
    }

    /// Number of bytes this sample occupies in a request body
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(&self.to_datum()).map_or(usize::MAX, |bytes| bytes.len())
    }
}

#[derive(Debug, Serialize)]
pub struct WireDimension<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "Value")]
    pub value: &'a str,
}

/// One entry of a `PutMetricData` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDatum<'a> {
    pub metric_name: &'a str,
    pub dimensions: Vec<WireDimension<'a>>,
    /// Seconds since the epoch
    pub timestamp: f64,
    pub value: f64,
    pub unit: Unit,
}

/// Body of a `PutMetricData` call
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutMetricDataRequest<'a> {
    pub namespace: &'a str,
    pub metric_data: Vec<MetricDatum<'a>>,
}

impl<'a> PutMetricDataRequest<'a> {
    pub fn new(namespace: &'a str, samples: &'a [MetricSample]) -> Self {
        Self {
            namespace,
            metric_data: samples.iter().map(MetricSample::to_datum).collect(),
        }
    }

    /// Size of a request for `namespace` carrying no data
    pub fn envelope_size(namespace: &str) -> usize {
        let empty = PutMetricDataRequest {
            namespace,
            metric_data: Vec::new(),
        };
        serde_json::to_vec(&empty).map_or(usize::MAX, |bytes| bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64) -> Result<MetricSample> {
        MetricSample::new(
            "msg.count",
            Statistic::Count,
            value,
            Unit::Count,
            Utc::now(),
            Dimensions::default(),
        )
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert!(sample(f64::NAN).is_err());
        assert!(sample(f64::INFINITY).is_err());
        assert!(sample(f64::NEG_INFINITY).is_err());
        assert!(sample(0.0).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = MetricSample::new(
            "",
            Statistic::Value,
            1.0,
            Unit::None,
            Utc::now(),
            Dimensions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_dimensions_sorted_and_unique() {
        let dims = Dimensions::new(
            vec![Dimension::new("zone", "a"), Dimension::new("host", "b")],
            10,
        )
        .unwrap();
        let keys: Vec<&str> = dims.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(keys, vec!["host", "zone"]);

        let duplicate = Dimensions::new(
            vec![Dimension::new("host", "a"), Dimension::new("host", "b")],
            10,
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_statistic_key_is_reserved() {
        let dims = Dimensions::new(vec![Dimension::new(STATISTIC_DIMENSION, "x")], 10);
        assert!(dims.is_err());
    }

    #[test]
    fn test_dimension_cap() {
        let dims = (0..3).map(|i| Dimension::new(format!("k{}", i), "v"));
        assert!(Dimensions::new(dims, 2).is_err());
    }

    #[test]
    fn test_datum_encoding() {
        let timestamp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let dims = Dimensions::new(vec![Dimension::new("host", "node-1")], 29).unwrap();
        let sample = MetricSample::new(
            "request.latency",
            Statistic::Max,
            12.5,
            Unit::Milliseconds,
            timestamp,
            dims,
        )
        .unwrap();

        let json = serde_json::to_value(sample.to_datum()).unwrap();
        assert_eq!(json["MetricName"], "request.latency");
        assert_eq!(json["Value"], 12.5);
        assert_eq!(json["Unit"], "Milliseconds");
        assert_eq!(json["Timestamp"], 1_700_000_000.0);
        assert_eq!(json["Dimensions"][0]["Name"], "host");
        assert_eq!(json["Dimensions"][1]["Name"], STATISTIC_DIMENSION);
        assert_eq!(json["Dimensions"][1]["Value"], "max");

        let encoded = serde_json::to_vec(&sample.to_datum()).unwrap();
        assert_eq!(sample.serialized_size(), encoded.len());
    }

    #[test]
    fn test_rate_unit_name() {
        assert_eq!(
            serde_json::to_value(Unit::CountPerSecond).unwrap(),
            "Count/Second"
        );
    }
}
