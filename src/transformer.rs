//! Conversion of registry snapshots into exportable samples
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace, warn};

use crate::batcher::BatchLimits;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::filter::MetricFilter;
use crate::sample::{Dimension, Dimensions, MetricSample, Statistic, Unit};
use crate::source::{AggregateState, Snapshot, Summary};

/// Samples produced from one snapshot, plus what was left out and why
#[derive(Debug, Default)]
pub struct Translation {
    pub samples: Vec<MetricSample>,
    /// Non-finite values
    pub dropped: u64,
    /// Outside the backend's recency window
    pub stale: u64,
    /// Zero values with zero submission disabled
    pub zero_skipped: u64,
    /// Metrics whose aggregate could not be read
    pub malformed: u64,
}

/// Converts snapshots into samples according to the static configuration
#[derive(Debug, Clone)]
pub struct SampleTranslator {
    filter: MetricFilter,
    dimensions: Dimensions,
    histogram_statistics: Vec<Statistic>,
    submit_zero_values: bool,
    max_age: Duration,
    max_skew: Duration,
}

impl SampleTranslator {
    pub fn new(
        filter: MetricFilter,
        global_dimensions: Vec<Dimension>,
        histogram_statistics: Vec<Statistic>,
        submit_zero_values: bool,
        limits: &BatchLimits,
    ) -> Result<Self> {
        // one slot is reserved for the statistic dimension
        let cap = limits.max_dimensions.saturating_sub(1);
        let dimensions = Dimensions::new(global_dimensions, cap)
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        Ok(Self {
            filter,
            dimensions,
            histogram_statistics,
            submit_zero_values,
            max_age: window("limits.max_sample_age_secs", limits.max_sample_age_secs)?,
            max_skew: window("limits.max_clock_skew_secs", limits.max_clock_skew_secs)?,
        })
    }

    /// Build a translator from the bridge configuration, resolving the
    /// host dimension if one is requested
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let mut dimensions: Vec<Dimension> = config
            .dimensions
            .iter()
            .map(|d| Dimension::new(&d.name, &d.value))
            .collect();

        if let Some(key) = &config.host_dimension {
            let host = hostname::get()?.to_string_lossy().into_owned();
            debug!("Adding host dimension {}={}", key, host);
            dimensions.push(Dimension::new(key, host));
        }

        Self::new(
            MetricFilter::new(&config.filter)?,
            dimensions,
            config.histogram_statistics.clone(),
            config.submit_zero_values,
            &config.limits,
        )
    }

    /// Translate a snapshot taken at `taken_at`
    pub fn translate(&self, snapshot: &Snapshot, taken_at: DateTime<Utc>) -> Translation {
        self.translate_at(snapshot, taken_at, Utc::now())
    }

    /// Translate a snapshot, judging recency against `now`
    pub fn translate_at(
        &self,
        snapshot: &Snapshot,
        taken_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Translation {
        let mut translation = Translation::default();
        // a bound beyond the representable range never excludes anything
        let too_old = now
            .checked_sub_signed(self.max_age)
            .is_some_and(|oldest| taken_at < oldest);
        let too_new = now
            .checked_add_signed(self.max_skew)
            .is_some_and(|latest| taken_at > latest);
        let stale = too_old || too_new;
        if stale {
            warn!(
                "Snapshot timestamp {} is outside the accepted window, its samples will be dropped",
                taken_at
            );
        }

        for (name, state) in snapshot {
            if !self.filter.matches(name) {
                trace!("Metric {} filtered out", name);
                continue;
            }

            let values = match self.expand(state) {
                Ok(values) => values,
                Err(reason) => {
                    warn!("Skipping {} {}: {}", state.kind(), name, reason);
                    translation.malformed += 1;
                    continue;
                }
            };

            for (statistic, value, unit) in values {
                if stale {
                    translation.stale += 1;
                    continue;
                }
                if value == 0.0 && !self.submit_zero_values {
                    translation.zero_skipped += 1;
                    continue;
                }

                match MetricSample::new(
                    name.as_str(),
                    statistic,
                    value,
                    unit,
                    taken_at,
                    self.dimensions.clone(),
                ) {
                    Ok(sample) => translation.samples.push(sample),
                    Err(e) => {
                        debug!("Dropping sample: {}", e);
                        translation.dropped += 1;
                    }
                }
            }
        }

        translation
    }

    /// Statistics, values and units a single aggregate expands to
    fn expand(&self, state: &AggregateState) -> std::result::Result<Vec<(Statistic, f64, Unit)>, String> {
        match state {
            AggregateState::Counter(count) => Ok(vec![(Statistic::Count, *count as f64, Unit::Count)]),
            AggregateState::Gauge(value) => Ok(vec![(Statistic::Value, *value, Unit::None)]),
            AggregateState::Meter { count, mean_rate } => Ok(vec![
                (Statistic::Count, *count as f64, Unit::Count),
                (Statistic::Value, *mean_rate, Unit::CountPerSecond),
            ]),
            AggregateState::Histogram(summary) => self.expand_summary(summary, Unit::None),
            AggregateState::Timer(summary) => self.expand_summary(summary, Unit::Milliseconds),
            AggregateState::Unavailable(reason) => Err(reason.clone()),
        }
    }

    fn expand_summary(
        &self,
        summary: &Summary,
        unit: Unit,
    ) -> std::result::Result<Vec<(Statistic, f64, Unit)>, String> {
        if summary.count > 0 && summary.min > summary.max {
            return Err(format!("min {} exceeds max {}", summary.min, summary.max));
        }

        let mut values = Vec::with_capacity(self.histogram_statistics.len());
        for statistic in &self.histogram_statistics {
            let entry = match statistic {
                Statistic::Count => Some((summary.count as f64, Unit::Count)),
                Statistic::Sum => Some((summary.sum, unit)),
                // undefined for an empty distribution
                Statistic::Min if summary.count > 0 => Some((summary.min, unit)),
                Statistic::Max if summary.count > 0 => Some((summary.max, unit)),
                Statistic::Average => summary.average().map(|avg| (avg, unit)),
                Statistic::Min | Statistic::Max | Statistic::Value => None,
            };
            if let Some((value, unit)) = entry {
                values.push((*statistic, value, unit));
            }
        }
        Ok(values)
    }
}

fn window(field: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| BridgeError::Config(format!("{} is out of range: {}", field, secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    fn translator(filter: FilterConfig, dims: Vec<Dimension>) -> SampleTranslator {
        SampleTranslator::new(
            MetricFilter::new(&filter).unwrap(),
            dims,
            vec![Statistic::Count, Statistic::Min, Statistic::Max, Statistic::Average],
            true,
            &BatchLimits::default(),
        )
        .unwrap()
    }

    fn snapshot(entries: Vec<(&str, AggregateState)>) -> Snapshot {
        entries
            .into_iter()
            .map(|(name, state)| (name.to_string(), state))
            .collect()
    }

    #[test]
    fn test_counter_yields_single_count() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let out = t.translate_at(&snapshot(vec![("msg.count", AggregateState::Counter(5))]), now, now);

        assert_eq!(out.samples.len(), 1);
        let sample = &out.samples[0];
        assert_eq!(sample.name(), "msg.count");
        assert_eq!(sample.statistic(), Statistic::Count);
        assert_eq!(sample.value(), 5.0);
        assert_eq!(sample.timestamp(), now);
        assert_eq!(out.dropped, 0);
    }

    #[test]
    fn test_sample_count_matches_configured_pairs() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let snap = snapshot(vec![
            ("a.counter", AggregateState::Counter(1)),
            ("b.gauge", AggregateState::Gauge(2.5)),
            ("c.meter", AggregateState::Meter { count: 3, mean_rate: 0.5 }),
            ("d.histogram", AggregateState::Histogram(Summary::of(&[1.0, 2.0]))),
            ("e.timer", AggregateState::Timer(Summary::of(&[10.0]))),
        ]);

        let out = t.translate_at(&snap, now, now);
        // 1 + 1 + 2 + 4 + 4
        assert_eq!(out.samples.len(), 12);

        let timer_units: Vec<Unit> = out
            .samples
            .iter()
            .filter(|s| s.name() == "e.timer")
            .map(|s| s.unit())
            .collect();
        assert_eq!(
            timer_units,
            vec![Unit::Count, Unit::Milliseconds, Unit::Milliseconds, Unit::Milliseconds]
        );
    }

    #[test]
    fn test_histogram_statistics_are_configurable() {
        let t = SampleTranslator::new(
            MetricFilter::allow_all(),
            vec![],
            vec![Statistic::Max, Statistic::Sum],
            true,
            &BatchLimits::default(),
        )
        .unwrap();
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![("h", AggregateState::Histogram(Summary::of(&[1.0, 4.0])))]),
            now,
            now,
        );
        let stats: Vec<(Statistic, f64)> =
            out.samples.iter().map(|s| (s.statistic(), s.value())).collect();
        assert_eq!(stats, vec![(Statistic::Max, 4.0), (Statistic::Sum, 5.0)]);
    }

    #[test]
    fn test_empty_histogram_only_counts() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![("h", AggregateState::Histogram(Summary::of(&[])))]),
            now,
            now,
        );
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].statistic(), Statistic::Count);
        assert_eq!(out.malformed, 0);
    }

    #[test]
    fn test_filtered_metrics_produce_nothing() {
        let t = translator(
            FilterConfig {
                include: vec!["keep.*".to_string()],
                exclude: vec![],
            },
            vec![],
        );
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![
                ("keep.me", AggregateState::Counter(1)),
                ("drop.me", AggregateState::Counter(1)),
            ]),
            now,
            now,
        );
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].name(), "keep.me");
    }

    #[test]
    fn test_non_finite_values_dropped_not_fatal() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![
                ("a", AggregateState::Gauge(f64::NAN)),
                ("b", AggregateState::Gauge(f64::INFINITY)),
                ("c", AggregateState::Gauge(1.0)),
            ]),
            now,
            now,
        );
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.dropped, 2);
    }

    #[test]
    fn test_malformed_aggregates_isolated() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![
                ("a", AggregateState::Unavailable("gauge callback panicked".to_string())),
                ("b", AggregateState::Histogram(Summary::new(2, 3.0, 5.0, 1.0))),
                ("c", AggregateState::Counter(7)),
            ]),
            now,
            now,
        );
        assert_eq!(out.malformed, 2);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].name(), "c");
    }

    #[test]
    fn test_global_dimensions_injected_in_key_order() {
        let t = translator(
            FilterConfig::default(),
            vec![Dimension::new("zone", "b"), Dimension::new("cluster", "a")],
        );
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![("x", AggregateState::Counter(1)), ("y", AggregateState::Gauge(1.0))]),
            now,
            now,
        );
        for sample in &out.samples {
            let keys: Vec<&str> = sample.dimensions().iter().map(|d| d.name.as_str()).collect();
            assert_eq!(keys, vec!["cluster", "zone"]);
        }
    }

    #[test]
    fn test_too_many_global_dimensions_rejected() {
        let limits = BatchLimits {
            max_dimensions: 2,
            ..BatchLimits::default()
        };
        let result = SampleTranslator::new(
            MetricFilter::allow_all(),
            vec![Dimension::new("a", "1"), Dimension::new("b", "2")],
            vec![],
            true,
            &limits,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_values_skipped_when_disabled() {
        let t = SampleTranslator::new(
            MetricFilter::allow_all(),
            vec![],
            vec![Statistic::Count],
            false,
            &BatchLimits::default(),
        )
        .unwrap();
        let now = Utc::now();
        let out = t.translate_at(
            &snapshot(vec![("a", AggregateState::Counter(0)), ("b", AggregateState::Counter(2))]),
            now,
            now,
        );
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.zero_skipped, 1);
    }

    #[test]
    fn test_stale_snapshot_dropped() {
        let t = translator(FilterConfig::default(), vec![]);
        let now = Utc::now();
        let snap = snapshot(vec![("a", AggregateState::Counter(1))]);

        let old = t.translate_at(&snap, now - Duration::days(15), now);
        assert!(old.samples.is_empty());
        assert_eq!(old.stale, 1);

        let future = t.translate_at(&snap, now + Duration::hours(3), now);
        assert!(future.samples.is_empty());
        assert_eq!(future.stale, 1);
    }

    #[test]
    fn test_unrepresentable_window_is_an_error() {
        let limits = BatchLimits {
            max_sample_age_secs: u64::MAX,
            ..BatchLimits::default()
        };
        let result = SampleTranslator::new(MetricFilter::allow_all(), vec![], vec![], true, &limits);
        assert!(matches!(result, Err(BridgeError::Config(_))));

        let limits = BatchLimits {
            max_clock_skew_secs: 10_000_000_000_000_000,
            ..BatchLimits::default()
        };
        let result = SampleTranslator::new(MetricFilter::allow_all(), vec![], vec![], true, &limits);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_window_past_calendar_range_keeps_samples() {
        let limits = BatchLimits {
            max_sample_age_secs: 10_000_000_000_000,
            max_clock_skew_secs: 10_000_000_000_000,
            ..BatchLimits::default()
        };
        let t = SampleTranslator::new(
            MetricFilter::allow_all(),
            vec![],
            vec![Statistic::Count],
            true,
            &limits,
        )
        .unwrap();
        let now = Utc::now();
        let out = t.translate_at(&snapshot(vec![("a", AggregateState::Counter(1))]), now, now);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.stale, 0);
    }
}
