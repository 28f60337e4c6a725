//! Metrics collection and summarization
//!
//! Every virtual user pushes one [`SampleRecord`] per request into a shared
//! [`MetricsCollector`]. Latencies are kept exactly (microseconds, not bucketed)
//! so percentiles are computed from the real distribution at the end of the run.

use crate::error::{ErrorKind, MetricsError, RequestError};
use crate::client::TargetResponse;
use crate::scenario::Scenario;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub scenario: Scenario,
    pub latency: Duration,
    pub success: bool,
    /// Cache marker for reads that received an HTTP response; `None` for writes
    /// and for reads that failed before a response arrived.
    pub cache_hit: Option<bool>,
    /// Milliseconds since the run started.
    pub timestamp_ms: u64,
    pub error: Option<ErrorKind>,
}

impl SampleRecord {
    /// Successful sample.
    pub fn success(scenario: Scenario, latency: Duration, cache_hit: Option<bool>) -> Self {
        Self {
            scenario,
            latency,
            success: true,
            cache_hit,
            timestamp_ms: 0,
            error: None,
        }
    }

    /// Build a sample from a judged request result.
    ///
    /// A read that got any HTTP response counts toward the cache counters; a
    /// missing marker counts as a miss.
    pub fn from_result(
        scenario: Scenario,
        result: &Result<TargetResponse, RequestError>,
        timestamp_ms: u64,
    ) -> Self {
        let (latency, success, marker, error) = match result {
            Ok(response) => (response.elapsed, true, Some(response.cache_hit), None),
            Err(err @ RequestError::UnexpectedStatus { cache_hit, .. }) => {
                (err.elapsed(), false, Some(*cache_hit), Some(err.kind()))
            }
            Err(err) => (err.elapsed(), false, None, Some(err.kind())),
        };

        let cache_hit = if scenario.is_read() {
            marker.map(|hit| hit.unwrap_or(false))
        } else {
            None
        };

        Self {
            scenario,
            latency,
            success,
            cache_hit,
            timestamp_ms,
            error,
        }
    }
}

/// Latency distribution summary. All latency fields are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl Summary {
    /// Summarize raw latencies; `None` when there are none.
    pub fn from_latencies(latencies_us: &[u64], failures: u64) -> Option<Self> {
        let mut sorted = latencies_us.to_vec();
        sorted.sort_unstable();
        Self::from_sorted(&sorted, failures)
    }

    /// Summarize latencies already sorted ascending.
    pub fn from_sorted(sorted: &[u64], failures: u64) -> Option<Self> {
        if sorted.is_empty() {
            return None;
        }

        let count = sorted.len() as u64;
        let sum: u128 = sorted.iter().map(|&v| v as u128).sum();

        Some(Self {
            count,
            failures,
            error_rate: failures as f64 / count as f64,
            mean_ms: sum as f64 / count as f64 / 1000.0,
            min_ms: us_to_ms(sorted[0]),
            p50_ms: us_to_ms(percentile(sorted, 0.50)),
            p90_ms: us_to_ms(percentile(sorted, 0.90)),
            p95_ms: us_to_ms(percentile(sorted, 0.95)),
            p99_ms: us_to_ms(percentile(sorted, 0.99)),
            max_ms: us_to_ms(sorted[sorted.len() - 1]),
        })
    }
}

/// Nearest-rank percentile over sorted values.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}

/// Hit/miss counts for reads that received a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounts {
    pub hits: u64,
    pub misses: u64,
}

impl CacheCounts {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.hits as f64 / total as f64),
        }
    }

    fn add(&mut self, other: CacheCounts) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

/// Cache-hit accounting over the whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: Option<f64>,
    pub per_scenario: BTreeMap<Scenario, CacheCounts>,
    /// Latency of reads served from the cache.
    pub hit_latency: Option<Summary>,
    /// Latency of reads that fell through to storage.
    pub miss_latency: Option<Summary>,
}

/// Finalized metrics for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub overall: Option<Summary>,
    pub scenarios: BTreeMap<Scenario, Summary>,
    pub cache: CacheSummary,
    /// Failure counts keyed by error kind (`timeout`, `transport`, `status 500`).
    pub errors: BTreeMap<String, u64>,
    /// Sorted latencies (µs) per scope, kept for arbitrary percentile queries.
    #[serde(skip)]
    distributions: BTreeMap<Option<Scenario>, Vec<u64>>,
}

impl RunSummary {
    /// Summary for one scenario, or overall when `scenario` is `None`.
    pub fn scope(&self, scenario: Option<Scenario>) -> Result<&Summary, MetricsError> {
        let found = match scenario {
            Some(s) => self.scenarios.get(&s),
            None => self.overall.as_ref(),
        };
        found.ok_or_else(|| MetricsError::NoSamples {
            scope: scope_label(scenario),
        })
    }

    /// Percentile `p` (0.0-1.0) of a scope's latency, in milliseconds.
    pub fn percentile_ms(&self, scenario: Option<Scenario>, p: f64) -> Result<f64, MetricsError> {
        match self.distributions.get(&scenario) {
            Some(sorted) if !sorted.is_empty() => Ok(us_to_ms(percentile(sorted, p))),
            _ => Err(MetricsError::NoSamples {
                scope: scope_label(scenario),
            }),
        }
    }

    /// Cache counts for one scenario, or all reads when `scenario` is `None`.
    pub fn cache_counts(&self, scenario: Option<Scenario>) -> CacheCounts {
        match scenario {
            Some(s) => self.cache.per_scenario.get(&s).copied().unwrap_or_default(),
            None => CacheCounts {
                hits: self.cache.hits,
                misses: self.cache.misses,
            },
        }
    }

    /// Completed requests per second over the run.
    pub fn throughput_rps(&self, scenario: Option<Scenario>) -> Option<f64> {
        if self.duration_secs <= 0.0 {
            return None;
        }
        self.scope(scenario)
            .ok()
            .map(|s| s.count as f64 / self.duration_secs)
    }

    pub fn total_requests(&self) -> u64 {
        self.overall.as_ref().map(|s| s.count).unwrap_or(0)
    }
}

/// Display label for a metric scope.
pub fn scope_label(scenario: Option<Scenario>) -> String {
    match scenario {
        Some(s) => format!("scenario:{}", s),
        None => "all requests".to_string(),
    }
}

/// Cheap running totals for progress reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub total: u64,
    pub failed: u64,
}

impl Progress {
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failed as f64 / self.total as f64
    }
}

#[derive(Debug, Default)]
struct Series {
    latencies_us: Vec<u64>,
    failures: u64,
}

#[derive(Debug, Default)]
struct Accumulator {
    scenarios: BTreeMap<Scenario, Series>,
    cache: BTreeMap<Scenario, CacheCounts>,
    cache_hit_latencies_us: Vec<u64>,
    cache_miss_latencies_us: Vec<u64>,
    errors: BTreeMap<ErrorKind, u64>,
    total: u64,
    failed: u64,
}

/// Shared collector; one per run, handed to every virtual user behind an `Arc`.
pub struct MetricsCollector {
    started: Instant,
    inner: Mutex<Accumulator>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(Accumulator::default()),
        }
    }

    /// When the collector was created; the run clock.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Milliseconds since the collector was created.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Fold one sample into the aggregates. Safe to call from many tasks at once.
    pub fn record(&self, sample: SampleRecord) {
        let latency_us = sample.latency.as_micros() as u64;
        let mut acc = self.inner.lock();

        acc.total += 1;
        let series = acc.scenarios.entry(sample.scenario).or_default();
        series.latencies_us.push(latency_us);

        if !sample.success {
            series.failures += 1;
            acc.failed += 1;
        }
        if let Some(kind) = sample.error {
            *acc.errors.entry(kind).or_insert(0) += 1;
        }

        if let Some(hit) = sample.cache_hit {
            let counts = acc.cache.entry(sample.scenario).or_default();
            if hit {
                counts.hits += 1;
                acc.cache_hit_latencies_us.push(latency_us);
            } else {
                counts.misses += 1;
                acc.cache_miss_latencies_us.push(latency_us);
            }
        }
    }

    pub fn progress(&self) -> Progress {
        let acc = self.inner.lock();
        Progress {
            total: acc.total,
            failed: acc.failed,
        }
    }

    /// Compute summaries over everything recorded so far.
    pub fn summarize(&self) -> RunSummary {
        self.summarize_over(self.started.elapsed())
    }

    /// Summaries with throughput taken over `duration`.
    pub fn summarize_over(&self, duration: Duration) -> RunSummary {
        let acc = self.inner.lock();

        let mut all_latencies = Vec::with_capacity(acc.total as usize);
        let mut scenarios = BTreeMap::new();
        let mut distributions = BTreeMap::new();
        for (scenario, series) in &acc.scenarios {
            all_latencies.extend_from_slice(&series.latencies_us);
            let mut sorted = series.latencies_us.clone();
            sorted.sort_unstable();
            if let Some(summary) = Summary::from_sorted(&sorted, series.failures) {
                scenarios.insert(*scenario, summary);
                distributions.insert(Some(*scenario), sorted);
            }
        }
        all_latencies.sort_unstable();
        let overall = Summary::from_sorted(&all_latencies, acc.failed);
        if overall.is_some() {
            distributions.insert(None, all_latencies);
        }

        let mut totals = CacheCounts::default();
        for counts in acc.cache.values() {
            totals.add(*counts);
        }

        RunSummary {
            duration_secs: duration.as_secs_f64(),
            overall,
            scenarios,
            cache: CacheSummary {
                hits: totals.hits,
                misses: totals.misses,
                hit_rate: totals.hit_rate(),
                per_scenario: acc.cache.clone(),
                hit_latency: Summary::from_latencies(&acc.cache_hit_latencies_us, 0),
                miss_latency: Summary::from_latencies(&acc.cache_miss_latencies_us, 0),
            },
            errors: acc
                .errors
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            distributions,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
