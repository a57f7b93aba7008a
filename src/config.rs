use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batcher::BatchLimits;
use crate::error::{BridgeError, Result};
use crate::filter::MetricFilter;
use crate::retry::RetryConfig;
use crate::sample::{STATISTIC_DIMENSION, Statistic};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "hivemq-metrics";

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Reporting interval used when the configured one is unusable
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;

/// Logging level
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// A dimension attached to every exported sample
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DimensionConfig {
    pub name: String,
    pub value: String,
}

/// Include / exclude rules applied to metric names
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct FilterConfig {
    /// Glob patterns; an empty list admits every metric
    #[serde(default)]
    pub include: Vec<String>,
    /// Glob patterns; a match here always wins over `include`
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Bridge configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// CloudWatch namespace the metrics are published under
    pub namespace: String,
    /// AWS region used to derive the endpoint
    pub region: String,
    /// Full endpoint URL replacing the regional one
    pub endpoint_override: Option<String>,
    /// Seconds between two reporting cycles
    pub report_interval_secs: u64,
    /// Timeout applied to each outbound call, in milliseconds
    pub api_timeout_ms: Option<u64>,
    /// Time allowed for an in-flight cycle to finish on shutdown
    pub shutdown_grace_secs: u64,
    /// Maximum number of simultaneous outbound calls within a cycle
    pub max_concurrency: usize,
    pub filter: FilterConfig,
    /// Global dimensions injected into every sample
    pub dimensions: Vec<DimensionConfig>,
    /// When set, a dimension with this name and the local hostname is added
    pub host_dimension: Option<String>,
    /// Statistics emitted for histogram and timer aggregates
    pub histogram_statistics: Vec<Statistic>,
    /// Whether zero-valued samples are exported
    pub submit_zero_values: bool,
    pub limits: BatchLimits,
    pub retry: RetryConfig,
    pub log_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint_override: None,
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            api_timeout_ms: None,
            shutdown_grace_secs: 10,
            max_concurrency: 4,
            filter: FilterConfig::default(),
            dimensions: Vec::new(),
            host_dimension: None,
            histogram_statistics: vec![
                Statistic::Count,
                Statistic::Min,
                Statistic::Max,
                Statistic::Average,
            ],
            submit_zero_values: true,
            limits: BatchLimits::default(),
            retry: RetryConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl BridgeConfig {
    /// Reporting interval as a duration
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Per-call timeout, if one is configured
    pub fn api_timeout(&self) -> Option<Duration> {
        self.api_timeout_ms.map(Duration::from_millis)
    }

    /// Grace period granted to an in-flight cycle on shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Endpoint the publisher talks to
    pub fn endpoint(&self) -> String {
        match &self.endpoint_override {
            Some(url) => url.clone(),
            None => format!("https://monitoring.{}.amazonaws.com/", self.region),
        }
    }

    /// Check the configuration, replacing unusable values with defaults.
    ///
    /// Out-of-range numbers are corrected with a warning; structural
    /// problems (empty namespace, duplicate dimensions, bad patterns)
    /// are errors.
    pub fn validate(mut self) -> Result<Self> {
        if self.namespace.trim().is_empty() {
            return Err(BridgeError::Config("namespace must not be empty".to_string()));
        }

        if self.report_interval_secs < 1 {
            warn!(
                "Report interval must be greater than 0, using default interval {}s",
                DEFAULT_REPORT_INTERVAL_SECS
            );
            self.report_interval_secs = DEFAULT_REPORT_INTERVAL_SECS;
        }

        if let Some(timeout) = self.api_timeout_ms {
            if timeout < 1 {
                warn!("API timeout must be greater than 0, using no timeout");
                self.api_timeout_ms = None;
            }
        }

        if self.max_concurrency == 0 {
            warn!("max_concurrency must be at least 1, using 1");
            self.max_concurrency = 1;
        }

        if self.retry.max_attempts == 0 {
            warn!("retry.max_attempts must be at least 1, using 1");
            self.retry.max_attempts = 1;
        }

        if self.histogram_statistics.is_empty() {
            warn!("No histogram statistics configured, histograms and timers will not be exported");
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if dimension.name.is_empty() || dimension.value.is_empty() {
                return Err(BridgeError::Config(
                    "dimension names and values must not be empty".to_string(),
                ));
            }
            if dimension.name == STATISTIC_DIMENSION {
                return Err(BridgeError::Config(format!(
                    "dimension name '{}' is reserved for the statistic",
                    STATISTIC_DIMENSION
                )));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(BridgeError::Config(format!(
                    "duplicate dimension '{}'",
                    dimension.name
                )));
            }
        }
        if let Some(host_key) = &self.host_dimension {
            if host_key == STATISTIC_DIMENSION {
                return Err(BridgeError::Config(format!(
                    "host dimension '{}' is reserved for the statistic",
                    host_key
                )));
            }
            if seen.contains(host_key.as_str()) {
                return Err(BridgeError::Config(format!(
                    "host dimension '{}' clashes with a configured dimension",
                    host_key
                )));
            }
        }

        self.limits.validate()?;
        MetricFilter::new(&self.filter)?;

        Ok(self)
    }
}

/// Source of configuration
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path (TOML format)
    File(PathBuf),
    /// Environment variables with a prefix
    Environment(String),
    /// TOML string
    Toml(String),
}

/// Load configuration from the given sources, later sources overriding earlier ones
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    warn!("Configuration file not found: {}", path.display());
                    continue;
                }

                debug!("Loading TOML configuration from file: {}", path.display());
                builder = builder.add_source(
                    config::File::from(path.as_path()).format(config::FileFormat::Toml),
                );
            }
            ConfigSource::Environment(prefix) => {
                debug!("Loading configuration from environment with prefix: {}", prefix);
                builder = builder.add_source(
                    config::Environment::with_prefix(&prefix)
                        .separator("__")
                        .try_parsing(true),
                );
            }
            ConfigSource::Toml(toml_str) => {
                debug!("Loading configuration from TOML string");
                builder = builder
                    .add_source(config::File::from_str(&toml_str, config::FileFormat::Toml));
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| BridgeError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config
        .try_deserialize()
        .map_err(|e| BridgeError::Config(format!("Failed to deserialize configuration: {}", e)))?;

    debug!("Configuration loaded successfully: {:?}", result);

    Ok(result)
}

/// Configuration builder
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    sources: Vec<ConfigSource>,
    _marker: PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Add environment variables
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<T> {
        load_config::<T>(self.sources)
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and validate the bridge configuration from a TOML file and
/// `CLOUDWATCH_BRIDGE__*` environment variables
pub fn load_bridge_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    ConfigBuilder::<BridgeConfig>::new()
        .add_file(path)
        .add_env("CLOUDWATCH_BRIDGE")
        .build()?
        .validate()
}
