//! Load generator for URL-shortener services
//!
//! Drives a mixed read/write workload against a shortener's HTTP API:
//! redirect lookups (`GET /<key>`) drawn from hot, warm and cold key tiers, and
//! shorten calls (`POST /api/shorten`). Concurrency follows a virtual-user
//! profile, every request is measured, cache hits are counted from a response
//! header, and the run is judged against k6-style thresholds.
//!
//! ```no_run
//! # async fn demo() -> shortload_core::Result<()> {
//! let config = shortload_core::LoadConfig::load(None, Some("http://localhost:8080"))?;
//! let outcome = shortload_core::run(config.build_plan()?).await?;
//! println!("passed: {}", outcome.verdict.passed);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod mixer;
pub mod profiles;
pub mod reporter;
pub mod request;
pub mod scenario;
pub mod scheduler;
pub mod thresholds;

pub use client::{HttpTarget, TargetClient, TargetResponse};
pub use config::{LoadConfig, RunPlan};
pub use error::{ConfigError, ErrorKind, MetricsError, RequestError, Result, ShortloadError};
pub use keys::KeyPools;
pub use metrics::{MetricsCollector, RunSummary, SampleRecord, Summary};
pub use mixer::{RequestMixer, ScenarioWeights};
pub use profiles::{target_concurrency, LoadModel, Stage};
pub use reporter::{ReportFormat, ResultWriter};
pub use request::{RequestSpec, TargetSettings, Workload};
pub use scenario::{ReadTier, Scenario};
pub use scheduler::{RunReport, SchedulerSettings, ThinkTime, VirtualUserScheduler, VuState};
pub use thresholds::{ThresholdEvaluator, ThresholdRule, Verdict};

use std::sync::Arc;

/// A finished run and its threshold verdict.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub verdict: Verdict,
}

/// Run a plan against the real HTTP target.
pub async fn run(plan: RunPlan) -> Result<RunOutcome> {
    let client = HttpTarget::new(plan.cache_header.clone())?;
    run_with_client(plan, Arc::new(client)).await
}

/// Run a plan through any [`TargetClient`].
pub async fn run_with_client(plan: RunPlan, client: Arc<dyn TargetClient>) -> Result<RunOutcome> {
    let RunPlan {
        workload,
        model,
        rules,
        settings,
        ..
    } = plan;

    let report = VirtualUserScheduler::new(workload, client, model, settings)
        .run()
        .await?;
    let verdict = ThresholdEvaluator::evaluate(&report.summary, &rules);

    for result in verdict.failures() {
        tracing::warn!(rule = %result.rule, outcome = ?result.outcome, "threshold not met");
    }

    Ok(RunOutcome { report, verdict })
}
