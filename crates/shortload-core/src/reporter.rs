//! Report generation for load run results

use crate::metrics::Summary;
use crate::scenario::Scenario;
use crate::scheduler::RunReport;
use crate::thresholds::{RuleOutcome, Verdict};
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Report format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Json,
}

/// Renders a finished run and its verdict.
pub struct ResultWriter<'a> {
    run_name: String,
    report: &'a RunReport,
    verdict: &'a Verdict,
}

impl<'a> ResultWriter<'a> {
    pub fn new(run_name: impl Into<String>, report: &'a RunReport, verdict: &'a Verdict) -> Self {
        Self {
            run_name: run_name.into(),
            report,
            verdict,
        }
    }

    pub fn passes(&self) -> bool {
        self.verdict.passed
    }

    /// One line per unmet rule, separating unevaluated rules from failed ones.
    pub fn failure_summary(&self) -> String {
        let lines: Vec<String> = self
            .verdict
            .failures()
            .filter_map(|result| match &result.outcome {
                RuleOutcome::Failed { observed } => Some(format!(
                    "FAILED {} (observed {:.3})",
                    result.rule, observed
                )),
                RuleOutcome::NoData { reason } => {
                    Some(format!("NO DATA {} ({})", result.rule, reason))
                }
                RuleOutcome::Passed { .. } => None,
            })
            .collect();

        if lines.is_empty() {
            "All thresholds passed".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Write report to file
    pub fn write_report(&self, path: impl AsRef<Path>, format: ReportFormat) -> std::io::Result<()> {
        let content = match format {
            ReportFormat::Markdown => self.generate_markdown(),
            ReportFormat::Json => self.generate_json()?,
        };

        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Plain-text summary for the terminal.
    pub fn console_summary(&self) -> String {
        let summary = &self.report.summary;
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.run_name);
        let _ = writeln!(
            out,
            "  duration {:.1}s, peak VUs {}, iterations {}",
            self.report.elapsed.as_secs_f64(),
            self.report.peak_vus,
            self.report.iterations
        );
        let _ = writeln!(
            out,
            "  {:<8} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "scope", "count", "failed", "avg", "p50", "p95", "p99", "max"
        );
        if let Some(overall) = &summary.overall {
            let _ = writeln!(out, "{}", console_row("all", overall));
        }
        for (scenario, scoped) in &summary.scenarios {
            let _ = writeln!(out, "{}", console_row(scenario.as_str(), scoped));
        }

        match summary.cache.hit_rate {
            Some(rate) => {
                let _ = writeln!(
                    out,
                    "  cache: {} hits / {} misses ({:.1}% hit rate)",
                    summary.cache.hits,
                    summary.cache.misses,
                    rate * 100.0
                );
            }
            None => {
                let _ = writeln!(out, "  cache: no read responses");
            }
        }
        for (kind, count) in &summary.errors {
            let _ = writeln!(out, "  errors[{}]: {}", kind, count);
        }

        let _ = writeln!(out, "  thresholds:");
        for result in &self.verdict.results {
            let mark = match &result.outcome {
                RuleOutcome::Passed { .. } => "✓",
                RuleOutcome::Failed { .. } => "✗",
                RuleOutcome::NoData { .. } => "?",
            };
            let _ = writeln!(out, "    {} {}{}", mark, result.rule, outcome_suffix(&result.outcome));
        }
        out
    }

    /// Generate Markdown report
    fn generate_markdown(&self) -> String {
        let summary = &self.report.summary;
        let pass_emoji = if self.passes() { "✅" } else { "❌" };

        let mut latency_rows = String::new();
        if let Some(overall) = &summary.overall {
            latency_rows.push_str(&markdown_row("all", overall));
        }
        for (scenario, scoped) in &summary.scenarios {
            latency_rows.push_str(&markdown_row(scenario.as_str(), scoped));
        }
        if latency_rows.is_empty() {
            latency_rows.push_str("| - | 0 | - | - | - | - | - | - |\n");
        }

        let mut threshold_rows = String::new();
        for result in &self.verdict.results {
            let (status, observed) = match &result.outcome {
                RuleOutcome::Passed { observed } => ("✅ passed", format!("{:.3}", observed)),
                RuleOutcome::Failed { observed } => ("❌ failed", format!("{:.3}", observed)),
                RuleOutcome::NoData { reason } => ("⚠️ no data", reason.clone()),
            };
            let _ = writeln!(
                threshold_rows,
                "| `{}` | {} | {} |",
                result.rule, observed, status
            );
        }

        let mut cache_rows = String::new();
        for scenario in [Scenario::Hot, Scenario::Warm, Scenario::Cold] {
            let counts = summary.cache_counts(Some(scenario));
            let _ = writeln!(
                cache_rows,
                "| {} | {} | {} | {} |",
                scenario,
                counts.hits,
                counts.misses,
                counts
                    .hit_rate()
                    .map(|r| format!("{:.1}%", r * 100.0))
                    .unwrap_or_else(|| "-".to_string())
            );
        }

        let errors = if summary.errors.is_empty() {
            "No errors recorded".to_string()
        } else {
            summary
                .errors
                .iter()
                .map(|(kind, count)| format!("- **{}**: {}", kind, count))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let unevaluated = self.verdict.unevaluated().count();
        let failed = self.verdict.failures().count() - unevaluated;

        format!(
            r#"# Load Run Report: {}

**Status**: {} {}

---

## Summary

- **Duration**: {:.1} seconds
- **Peak VUs**: {}
- **VUs Spawned**: {}
- **Iterations**: {}
- **Total Requests**: {}
- **Throughput**: {}

---

## Latency (ms)

| Scope | Count | Error Rate | Avg | P50 | P95 | P99 | Max |
|-------|-------|------------|-----|-----|-----|-----|-----|
{}
---

## Cache

| Tier | Hits | Misses | Hit Rate |
|------|------|--------|----------|
{}
- **Hit latency p95**: {}
- **Miss latency p95**: {}

---

## Thresholds

{} failed, {} could not be evaluated

| Rule | Observed | Status |
|------|----------|--------|
{}
---

## Errors

{}

---

**Report Generated**: {}
"#,
            self.run_name,
            pass_emoji,
            if self.passes() { "PASSED" } else { "FAILED" },
            self.report.elapsed.as_secs_f64(),
            self.report.peak_vus,
            self.report.vus_spawned,
            self.report.iterations,
            summary.total_requests(),
            summary
                .throughput_rps(None)
                .map(|r| format!("{:.1} req/s", r))
                .unwrap_or_else(|| "-".to_string()),
            latency_rows,
            cache_rows,
            summary
                .cache
                .hit_latency
                .as_ref()
                .map(|s| format!("{:.2}ms", s.p95_ms))
                .unwrap_or_else(|| "-".to_string()),
            summary
                .cache
                .miss_latency
                .as_ref()
                .map(|s| format!("{:.2}ms", s.p95_ms))
                .unwrap_or_else(|| "-".to_string()),
            failed,
            unevaluated,
            threshold_rows,
            errors,
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Generate JSON report
    fn generate_json(&self) -> std::io::Result<String> {
        let value = serde_json::json!({
            "name": self.run_name,
            "status": if self.passes() { "passed" } else { "failed" },
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "elapsed_seconds": self.report.elapsed.as_secs_f64(),
            "peak_vus": self.report.peak_vus,
            "vus_spawned": self.report.vus_spawned,
            "iterations": self.report.iterations,
            "metrics": self.report.summary,
            "thresholds": self.verdict,
        });
        serde_json::to_string_pretty(&value).map_err(std::io::Error::from)
    }
}

fn console_row(label: &str, s: &Summary) -> String {
    format!(
        "  {:<8} {:>8} {:>8} {:>7.2}ms {:>7.2}ms {:>7.2}ms {:>7.2}ms {:>7.2}ms",
        label, s.count, s.failures, s.mean_ms, s.p50_ms, s.p95_ms, s.p99_ms, s.max_ms
    )
}

fn markdown_row(label: &str, s: &Summary) -> String {
    format!(
        "| {} | {} | {:.2}% | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |\n",
        label,
        s.count,
        s.error_rate * 100.0,
        s.mean_ms,
        s.p50_ms,
        s.p95_ms,
        s.p99_ms,
        s.max_ms
    )
}

fn outcome_suffix(outcome: &RuleOutcome) -> String {
    match outcome {
        RuleOutcome::Passed { observed } | RuleOutcome::Failed { observed } => {
            format!(" (observed {:.3})", observed)
        }
        RuleOutcome::NoData { reason } => format!(" (no data: {})", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::metrics::{MetricsCollector, SampleRecord};
    use crate::thresholds::{default_thresholds, ThresholdEvaluator, ThresholdRule};
    use std::time::Duration;

    fn report_with(samples: Vec<SampleRecord>) -> RunReport {
        let collector = MetricsCollector::new();
        for sample in samples {
            collector.record(sample);
        }
        RunReport {
            summary: collector.summarize(),
            peak_vus: 4,
            vus_spawned: 4,
            iterations: 0,
            elapsed: Duration::from_secs(10),
        }
    }

    fn read(scenario: Scenario, ms: u64, hit: bool) -> SampleRecord {
        SampleRecord::success(scenario, Duration::from_millis(ms), Some(hit))
    }

    fn verdict(report: &RunReport) -> Verdict {
        let rules = ThresholdRule::parse_all(&default_thresholds()).unwrap();
        ThresholdEvaluator::evaluate(&report.summary, &rules)
    }

    #[test]
    fn test_passing_run() {
        let report = report_with(vec![
            read(Scenario::Hot, 5, true),
            read(Scenario::Warm, 20, false),
            read(Scenario::Cold, 80, false),
        ]);
        let verdict = verdict(&report);
        let writer = ResultWriter::new("smoke", &report, &verdict);

        assert!(writer.passes());
        assert_eq!(writer.failure_summary(), "All thresholds passed");
        assert!(writer.generate_markdown().contains("✅ PASSED"));
    }

    #[test]
    fn test_no_data_is_reported_apart_from_failures() {
        // Cold tier never sampled, hot tier too slow.
        let report = report_with(vec![
            read(Scenario::Hot, 120, true),
            read(Scenario::Warm, 20, false),
        ]);
        let verdict = verdict(&report);
        let writer = ResultWriter::new("partial", &report, &verdict);

        assert!(!writer.passes());
        let failures = writer.failure_summary();
        assert!(failures.contains("FAILED http_req_duration{scenario:hot} p(95)<50"));
        assert!(failures.contains("NO DATA http_req_duration{scenario:cold} p(95)<500"));

        let markdown = writer.generate_markdown();
        assert!(markdown.contains("2 failed, 2 could not be evaluated"));
        assert!(markdown.contains("⚠️ no data"));
        assert!(writer.console_summary().contains("? http_req_duration{scenario:cold}"));
    }

    #[test]
    fn test_json_report_structure() {
        let report = report_with(vec![
            read(Scenario::Hot, 5, true),
            SampleRecord::from_result(
                Scenario::Write,
                &Err(RequestError::Timeout {
                    elapsed: Duration::from_secs(10),
                }),
                0,
            ),
        ]);
        let verdict = verdict(&report);
        let writer = ResultWriter::new("json", &report, &verdict);

        let json: serde_json::Value = serde_json::from_str(&writer.generate_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["peak_vus"], 4);
        assert_eq!(json["metrics"]["errors"]["timeout"], 1);
        assert_eq!(json["metrics"]["cache"]["hits"], 1);
        assert_eq!(json["thresholds"]["passed"], false);
        assert!(json["thresholds"]["results"]
            .as_array()
            .unwrap()
            .iter()
            .any(|r| r["status"] == "no_data"));
    }

    #[test]
    fn test_write_report_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = report_with(vec![read(Scenario::Hot, 5, true)]);
        let verdict = verdict(&report);
        let writer = ResultWriter::new("files", &report, &verdict);

        let md = dir.path().join("report.md");
        let json = dir.path().join("report.json");
        writer.write_report(&md, ReportFormat::Markdown).unwrap();
        writer.write_report(&json, ReportFormat::Json).unwrap();

        assert!(std::fs::read_to_string(md).unwrap().starts_with("# Load Run Report: files"));
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(parsed["name"], "files");
    }
}
