//! Pass/fail thresholds over summarized metrics
//!
//! Rules use k6-style syntax so existing threshold sets carry over unchanged:
//!
//! ```text
//! http_req_duration{scenario:hot}   p(95)<50
//! http_req_failed                   rate<0.01
//! cache_hits{scenario:hot}          rate>0.9
//! http_reqs                         count>1000
//! ```
//!
//! A rule whose metric has no samples is reported as `NoData` and counts as
//! unmet; it never passes vacuously.

use crate::error::{ConfigError, MetricsError};
use crate::metrics::{scope_label, RunSummary};
use crate::scenario::Scenario;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metric a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    /// Request latency in milliseconds.
    HttpReqDuration,
    /// Share of requests that failed.
    HttpReqFailed,
    /// Completed requests.
    HttpReqs,
    /// Cache marker on read responses.
    CacheHits,
}

impl MetricKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqFailed => "http_req_failed",
            Self::HttpReqs => "http_reqs",
            Self::CacheHits => "cache_hits",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "http_req_duration" => Some(Self::HttpReqDuration),
            "http_req_failed" => Some(Self::HttpReqFailed),
            "http_reqs" => Some(Self::HttpReqs),
            "cache_hits" => Some(Self::CacheHits),
            _ => None,
        }
    }

    fn supports(&self, aggregate: Aggregate) -> bool {
        match self {
            Self::HttpReqDuration => matches!(
                aggregate,
                Aggregate::Avg
                    | Aggregate::Min
                    | Aggregate::Med
                    | Aggregate::Max
                    | Aggregate::Percentile(_)
            ),
            Self::HttpReqFailed => matches!(aggregate, Aggregate::Rate),
            Self::HttpReqs | Self::CacheHits => {
                matches!(aggregate, Aggregate::Count | Aggregate::Rate)
            }
        }
    }
}

/// Statistic taken from a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Avg,
    Min,
    Med,
    Max,
    /// Percentile in (0, 100].
    Percentile(f64),
    Rate,
    Count,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Med => f.write_str("med"),
            Self::Max => f.write_str("max"),
            Self::Percentile(p) => write!(f, "p({})", p),
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
}

impl Comparator {
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Le => observed <= bound,
            Self::Gt => observed > bound,
            Self::Ge => observed >= bound,
            Self::Eq => (observed - bound).abs() < 1e-9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }
}

/// Threshold as written in configuration: one metric selector, many conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Metric with optional tag filter, e.g. `http_req_duration{scenario:hot}`.
    pub metric: String,
    /// Conditions such as `p(95)<50`.
    pub conditions: Vec<String>,
}

impl ThresholdSpec {
    pub fn new(metric: impl Into<String>, conditions: &[&str]) -> Self {
        Self {
            metric: metric.into(),
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// One parsed predicate over a summarized metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdRule {
    pub metric: MetricKey,
    pub scenario: Option<Scenario>,
    pub aggregate: Aggregate,
    pub comparator: Comparator,
    pub bound: f64,
}

impl ThresholdRule {
    /// Parse a selector and a single condition.
    pub fn parse(selector: &str, condition: &str) -> Result<Self, ConfigError> {
        let (metric, scenario) = parse_selector(selector)?;
        let (aggregate, comparator, bound) = parse_condition(condition)?;

        if !metric.supports(aggregate) {
            return Err(ConfigError::threshold(
                condition,
                format!("`{}` is not available on {}", aggregate, metric.as_str()),
            ));
        }
        if metric == MetricKey::CacheHits && scenario == Some(Scenario::Write) {
            return Err(ConfigError::threshold(
                selector,
                "cache_hits only applies to read scenarios",
            ));
        }

        Ok(Self {
            metric,
            scenario,
            aggregate,
            comparator,
            bound,
        })
    }

    /// Expand every configured entry into individual rules.
    pub fn parse_all(specs: &[ThresholdSpec]) -> Result<Vec<Self>, ConfigError> {
        let mut rules = Vec::new();
        for spec in specs {
            if spec.conditions.is_empty() {
                return Err(ConfigError::threshold(
                    &spec.metric,
                    "at least one condition is required",
                ));
            }
            for condition in &spec.conditions {
                rules.push(Self::parse(&spec.metric, condition)?);
            }
        }
        Ok(rules)
    }

    /// Value the rule compares, or why it cannot be computed.
    pub fn observe(&self, summary: &RunSummary) -> Result<f64, MetricsError> {
        match self.metric {
            MetricKey::HttpReqDuration => {
                let scope = summary.scope(self.scenario)?;
                match self.aggregate {
                    Aggregate::Avg => Ok(scope.mean_ms),
                    Aggregate::Min => Ok(scope.min_ms),
                    Aggregate::Med => Ok(scope.p50_ms),
                    Aggregate::Max => Ok(scope.max_ms),
                    Aggregate::Percentile(p) => summary.percentile_ms(self.scenario, p / 100.0),
                    // Not accepted by `parse`; answer with the sample count.
                    Aggregate::Rate | Aggregate::Count => Ok(scope.count as f64),
                }
            }
            MetricKey::HttpReqFailed => Ok(summary.scope(self.scenario)?.error_rate),
            MetricKey::HttpReqs => {
                let scope = summary.scope(self.scenario)?;
                match self.aggregate {
                    Aggregate::Count => Ok(scope.count as f64),
                    _ => Ok(scope.count as f64 / summary.duration_secs.max(f64::EPSILON)),
                }
            }
            MetricKey::CacheHits => {
                let counts = summary.cache_counts(self.scenario);
                let no_data = || MetricsError::NoSamples {
                    scope: format!("cache markers on {}", scope_label(self.scenario)),
                };
                match self.aggregate {
                    Aggregate::Count if counts.total() > 0 => Ok(counts.hits as f64),
                    Aggregate::Count => Err(no_data()),
                    _ => counts.hit_rate().ok_or_else(no_data),
                }
            }
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric.as_str())?;
        if let Some(scenario) = self.scenario {
            write!(f, "{{scenario:{}}}", scenario)?;
        }
        write!(f, " {}{}{}", self.aggregate, self.comparator.as_str(), self.bound)
    }
}

fn parse_selector(selector: &str) -> Result<(MetricKey, Option<Scenario>), ConfigError> {
    let selector = selector.trim();
    let (name, tags) = match selector.find('{') {
        Some(open) => {
            let close = selector.rfind('}').filter(|close| *close == selector.len() - 1);
            let Some(close) = close else {
                return Err(ConfigError::threshold(selector, "unterminated tag filter"));
            };
            (&selector[..open], Some(&selector[open + 1..close]))
        }
        None => (selector, None),
    };

    let metric = MetricKey::parse(name.trim()).ok_or_else(|| {
        ConfigError::threshold(
            selector,
            "unknown metric, expected http_req_duration, http_req_failed, http_reqs or cache_hits",
        )
    })?;

    let scenario = match tags {
        None => None,
        Some(tags) => {
            let (key, value) = tags
                .split_once(':')
                .ok_or_else(|| ConfigError::threshold(selector, "tag filter must be key:value"))?;
            if key.trim() != "scenario" {
                return Err(ConfigError::threshold(
                    selector,
                    format!("unsupported tag '{}', only 'scenario' is supported", key.trim()),
                ));
            }
            Some(
                value
                    .parse::<Scenario>()
                    .map_err(|e| ConfigError::threshold(selector, e))?,
            )
        }
    };

    Ok((metric, scenario))
}

fn parse_condition(condition: &str) -> Result<(Aggregate, Comparator, f64), ConfigError> {
    let trimmed = condition.trim();
    let op_start = trimmed
        .find(|c| matches!(c, '<' | '>' | '='))
        .ok_or_else(|| ConfigError::threshold(condition, "missing comparator"))?;

    let (lhs, rest) = trimmed.split_at(op_start);
    let (comparator, rhs) = if let Some(rhs) = rest.strip_prefix("<=") {
        (Comparator::Le, rhs)
    } else if let Some(rhs) = rest.strip_prefix(">=") {
        (Comparator::Ge, rhs)
    } else if let Some(rhs) = rest.strip_prefix("==") {
        (Comparator::Eq, rhs)
    } else if let Some(rhs) = rest.strip_prefix('<') {
        (Comparator::Lt, rhs)
    } else if let Some(rhs) = rest.strip_prefix('>') {
        (Comparator::Gt, rhs)
    } else {
        return Err(ConfigError::threshold(condition, "unknown comparator"));
    };

    let bound: f64 = rhs
        .trim()
        .parse()
        .map_err(|_| ConfigError::threshold(condition, format!("invalid bound '{}'", rhs.trim())))?;
    if !bound.is_finite() {
        return Err(ConfigError::threshold(condition, "bound must be finite"));
    }

    Ok((parse_aggregate(lhs.trim(), condition)?, comparator, bound))
}

fn parse_aggregate(token: &str, condition: &str) -> Result<Aggregate, ConfigError> {
    let aggregate = match token {
        "avg" => Aggregate::Avg,
        "min" => Aggregate::Min,
        "med" => Aggregate::Med,
        "max" => Aggregate::Max,
        "rate" => Aggregate::Rate,
        "count" => Aggregate::Count,
        _ => {
            let inner = token
                .strip_prefix("p(")
                .and_then(|t| t.strip_suffix(')'))
                .ok_or_else(|| {
                    ConfigError::threshold(condition, format!("unknown aggregate '{}'", token))
                })?;
            let p: f64 = inner.trim().parse().map_err(|_| {
                ConfigError::threshold(condition, format!("invalid percentile '{}'", inner))
            })?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(ConfigError::threshold(
                    condition,
                    "percentile must be within (0, 100]",
                ));
            }
            Aggregate::Percentile(p)
        }
    };
    Ok(aggregate)
}

/// Result of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Passed { observed: f64 },
    Failed { observed: f64 },
    /// Metric had no samples; the rule could not be evaluated and is unmet.
    NoData { reason: String },
}

impl RuleOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    /// Rule in its display form.
    pub rule: String,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
    #[serde(skip)]
    pub parsed: ThresholdRule,
}

/// Overall verdict of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub results: Vec<RuleResult>,
}

impl Verdict {
    /// Rules that were not met, whether evaluated or not.
    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.outcome.is_pass())
    }

    /// Rules that could not be evaluated for lack of data.
    pub fn unevaluated(&self) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, RuleOutcome::NoData { .. }))
    }
}

/// Compares summarized metrics against the configured rules.
pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    pub fn evaluate(summary: &RunSummary, rules: &[ThresholdRule]) -> Verdict {
        let results: Vec<RuleResult> = rules
            .iter()
            .map(|rule| {
                let outcome = match rule.observe(summary) {
                    Ok(observed) if rule.comparator.holds(observed, rule.bound) => {
                        RuleOutcome::Passed { observed }
                    }
                    Ok(observed) => RuleOutcome::Failed { observed },
                    Err(err) => RuleOutcome::NoData {
                        reason: err.to_string(),
                    },
                };
                RuleResult {
                    rule: rule.to_string(),
                    outcome,
                    parsed: rule.clone(),
                }
            })
            .collect();

        Verdict {
            passed: results.iter().all(|r| r.outcome.is_pass()),
            results,
        }
    }
}

/// Threshold set used when none is configured.
pub fn default_thresholds() -> Vec<ThresholdSpec> {
    vec![
        ThresholdSpec::new("http_req_duration{scenario:hot}", &["p(95)<50", "p(99)<100"]),
        ThresholdSpec::new("http_req_duration{scenario:warm}", &["p(95)<100", "p(99)<200"]),
        ThresholdSpec::new("http_req_duration{scenario:cold}", &["p(95)<500", "p(99)<1000"]),
        ThresholdSpec::new("http_req_failed", &["rate<0.01"]),
    ]
}
