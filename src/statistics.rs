//! Statistics collection for fan-out queries
//!
//! The coordinator reports per-shard response times, shard errors, pool
//! saturation and overall timings through the [`StatisticsSink`] trait. Sinks are
//! injected rather than global, must never block the query path for long and
//! must never fail it.
//!
//! Two implementations ship with the crate:
//! - [`NoopStatistics`]: discards everything, the default
//! - [`InMemoryStatistics`]: keeps counters and a bounded window of samples per
//!   metric, with percentile queries for monitoring surfaces

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of recent samples kept per metric
const MAX_SAMPLES_PER_METRIC: usize = 1000;

/// Fire-and-forget statistics collaborator
pub trait StatisticsSink: Send + Sync {
    /// Record one observation of a metric
    fn record_value(&self, metric: &str, value: f64);

    /// Record one failure of the operation a metric measures
    fn record_error(&self, metric: &str);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatistics;

impl StatisticsSink for NoopStatistics {
    fn record_value(&self, _metric: &str, _value: f64) {}

    fn record_error(&self, _metric: &str) {}
}

/// Point-in-time summary of one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: u64,
    pub errors: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricSummary {
    /// Fraction of recorded events that were errors
    pub fn error_rate(&self) -> f64 {
        let total = self.count + self.errors;
        if total > 0 {
            self.errors as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Running state of one metric
#[derive(Debug, Clone)]
struct MetricSeries {
    count: u64,
    errors: u64,
    sum: f64,
    min: f64,
    max: f64,
    samples: VecDeque<f64>,
}

impl Default for MetricSeries {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: VecDeque::new(),
        }
    }
}

impl MetricSeries {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.samples.push_back(value);

        // Keep only recent samples for percentiles
        if self.samples.len() > MAX_SAMPLES_PER_METRIC {
            self.samples.pop_front();
        }
    }

    fn summary(&self) -> MetricSummary {
        let percentiles = Percentiles::of(&self.samples);

        let (min, max, mean) = if self.count > 0 {
            (self.min, self.max, self.sum / self.count as f64)
        } else {
            (0.0, 0.0, 0.0)
        };

        MetricSummary {
            count: self.count,
            errors: self.errors,
            sum: self.sum,
            min,
            max,
            mean,
            p50: percentiles.at(0.5),
            p95: percentiles.at(0.95),
            p99: percentiles.at(0.99),
        }
    }
}

/// In-process statistics sink
///
/// Event totals are kept in atomics so readers of [`InMemoryStatistics::total_events`]
/// never contend with writers; per-metric series share one `RwLock` that is held
/// only for the duration of a push.
pub struct InMemoryStatistics {
    total_values: AtomicU64,
    total_errors: AtomicU64,
    series: RwLock<FxHashMap<String, MetricSeries>>,
}

impl InMemoryStatistics {
    pub fn new() -> Self {
        Self {
            total_values: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            series: RwLock::new(FxHashMap::default()),
        }
    }

    /// Summary of a metric, if it was ever recorded
    pub fn summary(&self, metric: &str) -> Option<MetricSummary> {
        self.series.read().get(metric).map(MetricSeries::summary)
    }

    /// Names of every metric seen so far, sorted
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total (values, errors) recorded across all metrics
    pub fn total_events(&self) -> (u64, u64) {
        (
            self.total_values.load(Ordering::Relaxed),
            self.total_errors.load(Ordering::Relaxed),
        )
    }

    /// Forget every metric
    pub fn clear(&self) {
        self.series.write().clear();
        self.total_values.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for InMemoryStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsSink for InMemoryStatistics {
    fn record_value(&self, metric: &str, value: f64) {
        self.total_values.fetch_add(1, Ordering::Relaxed);
        self.series.write().entry(metric.to_string()).or_default().push(value);
    }

    fn record_error(&self, metric: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.series.write().entry(metric.to_string()).or_default().errors += 1;
    }
}

/// Sorted copy of a metric's sample window
struct Percentiles {
    sorted: Vec<f64>,
}

impl Percentiles {
    fn of<'a>(samples: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut sorted: Vec<f64> = samples.into_iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted }
    }

    /// Nearest-rank percentile; `p` is clamped to `[0.0, 1.0]`, NaN reads as 0.0
    fn at(&self, p: f64) -> f64 {
        let Some(last) = self.sorted.len().checked_sub(1) else {
            return 0.0;
        };
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        let index = ((last as f64) * p).round() as usize;
        self.sorted.get(index.min(last)).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = NoopStatistics;
        sink.record_value("anything", 1.0);
        sink.record_error("anything");
    }

    #[test]
    fn test_in_memory_summary() {
        let stats = InMemoryStatistics::new();
        stats.record_value("shard_time.a", 10.0);
        stats.record_value("shard_time.a", 30.0);
        stats.record_value("shard_time.a", 20.0);
        stats.record_error("shard_time.a");

        let summary = stats.summary("shard_time.a").unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.mean, 20.0);
        assert_eq!(summary.p50, 20.0);
        assert_eq!(summary.error_rate(), 0.25);
        assert_eq!(stats.total_events(), (3, 1));
    }

    #[test]
    fn test_errors_only_metric() {
        let stats = InMemoryStatistics::new();
        stats.record_error("shard_time.down");

        let summary = stats.summary("shard_time.down").unwrap();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.mean, 0.0);
        assert_eq!(summary.error_rate(), 1.0);
        assert!(stats.summary("never_seen").is_none());
    }

    #[test]
    fn test_metric_names_sorted_and_clear() {
        let stats = InMemoryStatistics::new();
        stats.record_value("b", 1.0);
        stats.record_value("a", 1.0);
        assert_eq!(stats.metric_names(), vec!["a".to_string(), "b".to_string()]);

        stats.clear();
        assert!(stats.metric_names().is_empty());
        assert_eq!(stats.total_events(), (0, 0));
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let stats = InMemoryStatistics::new();
        for i in 0..(MAX_SAMPLES_PER_METRIC + 500) {
            stats.record_value("m", i as f64);
        }

        let summary = stats.summary("m").unwrap();
        assert_eq!(summary.count, (MAX_SAMPLES_PER_METRIC + 500) as u64);
        assert_eq!(summary.min, 0.0);
        // percentiles only see the retained window
        assert!(summary.p50 >= 500.0);
    }

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(InMemoryStatistics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        stats.record_value("shared", i as f64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("recording thread should not panic");
        }

        assert_eq!(stats.summary("shared").unwrap().count, 800);
    }

    #[test]
    fn test_percentiles() {
        let samples: Vec<f64> = (1..=100).rev().map(|i| i as f64).collect();
        let percentiles = Percentiles::of(&samples);

        assert_eq!(percentiles.at(0.5), 51.0);
        assert_eq!(percentiles.at(0.95), 95.0);
        assert_eq!(percentiles.at(0.99), 99.0);

        assert_eq!(Percentiles::of(&[]).at(0.5), 0.0);
        assert_eq!(Percentiles::of(&[42.0]).at(0.95), 42.0);
    }

    #[test]
    fn test_percentile_outside_unit_range_is_clamped() {
        let percentiles = Percentiles::of(&[1.0, 2.0]);

        assert_eq!(percentiles.at(1.5), 2.0);
        assert_eq!(percentiles.at(-0.5), 1.0);
        assert_eq!(percentiles.at(f64::NAN), 1.0);
        assert_eq!(percentiles.at(f64::INFINITY), 2.0);
    }
}
