//! Configuration management for shortload
//!
//! Sources, lowest precedence first:
//! - built-in defaults (the serde defaults below)
//! - `./config/shortload.{toml,yaml,json}` if present
//! - the file named by `SHORTLOAD_CONFIG`, or an explicit path
//! - environment variables, e.g. `SHORTLOAD__TARGET__BASE_URL`
//! - programmatic overrides (the CLI's `--base-url`)

use crate::client::DEFAULT_CACHE_HEADER;
use crate::error::ConfigError;
use crate::keys::KeyPools;
use crate::mixer::{RequestMixer, ScenarioWeights};
use crate::profiles::{LoadModel, Stage};
use crate::request::{TargetSettings, Workload};
use crate::scheduler::{SchedulerSettings, ThinkTime};
use crate::thresholds::{default_thresholds, ThresholdRule, ThresholdSpec};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an extra config file.
pub const CONFIG_PATH_ENV: &str = "SHORTLOAD_CONFIG";

/// Root configuration for a load run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,

    #[serde(default)]
    pub load: LoadProfileConfig,

    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<ThresholdSpec>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            workload: WorkloadConfig::default(),
            load: LoadProfileConfig::default(),
            thresholds: default_thresholds(),
        }
    }
}

impl LoadConfig {
    /// Load and validate configuration from all sources.
    ///
    /// `path` takes the place of `SHORTLOAD_CONFIG` when given; `base_url`
    /// overrides every other source.
    pub fn load(path: Option<&Path>, base_url: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("./config/shortload").required(false));

        match path {
            Some(path) => builder = builder.add_source(File::from(path)),
            None => {
                if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
                    builder = builder.add_source(File::with_name(&config_path));
                }
            }
        }

        // Example: SHORTLOAD__LOAD__TICK_MS=500
        builder = builder.add_source(
            Environment::with_prefix("SHORTLOAD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = base_url {
            builder = builder.set_override("target.base_url", url)?;
        }

        let config: LoadConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single file, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: LoadConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value without starting anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build_plan().map(|_| ())
    }

    /// Resolve the configuration into the objects a run needs.
    pub fn build_plan(&self) -> Result<RunPlan, ConfigError> {
        let w = &self.workload;
        let weights = ScenarioWeights::tiered(w.hot_weight, w.warm_weight, w.cold_weight)?;
        let mixer = RequestMixer::new(w.read_ratio, weights)?;
        let pools = KeyPools::new(w.hot_keys, w.warm_keys, w.cold_keyspace)?;

        if w.think_time_min_ms > w.think_time_max_ms {
            return Err(ConfigError::value(
                "workload.think_time_min_ms",
                format!(
                    "must be <= think_time_max_ms ({} > {})",
                    w.think_time_min_ms, w.think_time_max_ms
                ),
            ));
        }

        let t = &self.target;
        if reqwest::header::HeaderName::from_bytes(t.cache_header.as_bytes()).is_err() {
            return Err(ConfigError::value(
                "target.cache_header",
                format!("'{}' is not a valid header name", t.cache_header),
            ));
        }
        let workload = Workload::new(
            mixer,
            pools,
            TargetSettings {
                base_url: t.base_url.clone(),
                shorten_path: t.shorten_path.clone(),
                url_prefix: t.url_prefix.clone(),
                redirect_timeout: Duration::from_millis(t.redirect_timeout_ms),
                shorten_timeout: Duration::from_millis(t.shorten_timeout_ms),
            },
        )?;

        let model = self.load.model()?;
        let rules = ThresholdRule::parse_all(&self.thresholds)?;

        if self.load.tick_ms == 0 {
            return Err(ConfigError::value("load.tick_ms", "must be > 0"));
        }
        if self.load.progress_interval_ms == 0 {
            return Err(ConfigError::value("load.progress_interval_ms", "must be > 0"));
        }

        Ok(RunPlan {
            workload,
            model,
            rules,
            settings: SchedulerSettings {
                tick: Duration::from_millis(self.load.tick_ms),
                progress_interval: Duration::from_millis(self.load.progress_interval_ms),
                think_time: ThinkTime {
                    min: Duration::from_millis(w.think_time_min_ms),
                    max: Duration::from_millis(w.think_time_max_ms),
                },
            },
            cache_header: t.cache_header.clone(),
        })
    }
}

/// System under test.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: String,
    pub shorten_path: String,
    /// Prefix of the long URLs submitted by writes.
    pub url_prefix: String,
    pub redirect_timeout_ms: u64,
    pub shorten_timeout_ms: u64,
    /// Response header carrying the cache marker.
    pub cache_header: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            shorten_path: "/api/shorten".to_string(),
            url_prefix: "https://example.com/page".to_string(),
            redirect_timeout_ms: 5_000,
            shorten_timeout_ms: 10_000,
            cache_header: DEFAULT_CACHE_HEADER.to_string(),
        }
    }
}

/// Request mix, key pools and pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Probability that an iteration is a read.
    pub read_ratio: f64,
    pub hot_weight: f64,
    pub warm_weight: f64,
    pub cold_weight: f64,
    pub hot_keys: usize,
    pub warm_keys: usize,
    pub cold_keyspace: u64,
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            read_ratio: 0.8,
            hot_weight: 0.3,
            warm_weight: 0.5,
            cold_weight: 0.2,
            hot_keys: 100,
            warm_keys: 10_000,
            cold_keyspace: 9_890_000,
            think_time_min_ms: 100,
            think_time_max_ms: 100,
        }
    }
}

/// Executor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    #[default]
    RampingVus,
    PerVuIterations,
}

/// Load profile and scheduler timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadProfileConfig {
    pub executor: Executor,

    // ramping_vus
    pub start_vus: usize,
    pub stages: Vec<Stage>,

    // per_vu_iterations
    pub vus: usize,
    pub iterations: u64,
    pub max_duration_ms: u64,

    pub tick_ms: u64,
    pub progress_interval_ms: u64,
}

impl Default for LoadProfileConfig {
    fn default() -> Self {
        Self {
            executor: Executor::RampingVus,
            start_vus: 0,
            stages: vec![Stage::new(Duration::from_secs(10), 100)],
            vus: 10,
            iterations: 100,
            max_duration_ms: 600_000,
            tick_ms: 1_000,
            progress_interval_ms: 10_000,
        }
    }
}

impl LoadProfileConfig {
    pub fn model(&self) -> Result<LoadModel, ConfigError> {
        match self.executor {
            Executor::RampingVus => LoadModel::ramping(self.start_vus, self.stages.clone()),
            Executor::PerVuIterations => LoadModel::per_vu_iterations(
                self.vus,
                self.iterations,
                Duration::from_millis(self.max_duration_ms),
            ),
        }
    }
}

/// Everything resolved from a [`LoadConfig`], ready to run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub workload: Workload,
    pub model: LoadModel,
    pub rules: Vec<ThresholdRule>,
    pub settings: SchedulerSettings,
    pub cache_header: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_reference_workload() {
        let config = LoadConfig::default();
        config.validate().unwrap();

        let plan = config.build_plan().unwrap();
        assert_eq!(plan.workload.mixer().read_ratio(), 0.8);
        assert_eq!(plan.workload.pools().hot().len(), 100);
        assert_eq!(plan.workload.pools().warm().len(), 10_000);
        assert_eq!(plan.workload.pools().cold_keyspace_size(), 9_890_000);
        assert_eq!(plan.model.duration(), Duration::from_secs(10));
        assert_eq!(plan.model.max_vus(), 100);
        assert_eq!(plan.rules.len(), 7);
        assert_eq!(plan.settings.think_time, ThinkTime::fixed(Duration::from_millis(100)));
        assert_eq!(plan.cache_header, "X-Cache-Hit");
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let file = write_config(
            r#"
[target]
base_url = "http://shortener.internal:9000/"

[workload]
read_ratio = 0.95
think_time_min_ms = 50
think_time_max_ms = 150

[load]
executor = "per_vu_iterations"
vus = 4
iterations = 20

[[thresholds]]
metric = "http_req_failed"
conditions = ["rate<0.05"]
"#,
        );

        let config = LoadConfig::from_file(file.path()).unwrap();
        assert_eq!(config.workload.read_ratio, 0.95);
        assert_eq!(config.workload.hot_keys, 100);
        assert_eq!(config.load.executor, Executor::PerVuIterations);

        let plan = config.build_plan().unwrap();
        assert_eq!(plan.workload.target().base_url, "http://shortener.internal:9000");
        assert_eq!(plan.rules.len(), 1);
        assert!(matches!(
            plan.model,
            LoadModel::PerVuIterations {
                vus: 4,
                iterations: 20,
                ..
            }
        ));
    }

    #[test]
    fn test_stages_from_file() {
        let file = write_config(
            r#"
[load]
start_vus = 5
stages = [
  { duration_ms = 30000, target = 50 },
  { duration_ms = 10000, target = 0 },
]
"#,
        );

        let config = LoadConfig::from_file(file.path()).unwrap();
        let plan = config.build_plan().unwrap();
        assert_eq!(plan.model.duration(), Duration::from_secs(40));
        assert_eq!(plan.model.max_vus(), 50);
    }

    #[test]
    fn test_load_applies_base_url_override() {
        let file = write_config("[target]\nbase_url = \"http://from-file:1\"\n");
        let config = LoadConfig::load(Some(file.path()), Some("http://from-flag:2")).unwrap();
        assert_eq!(config.target.base_url, "http://from-flag:2");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LoadConfig::default();
        config.workload.hot_weight = 0.6;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWeights(_))));

        let mut config = LoadConfig::default();
        config.workload.think_time_min_ms = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "workload.think_time_min_ms",
                ..
            })
        ));

        let mut config = LoadConfig::default();
        config.load.stages.clear();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStages(_))));

        let mut config = LoadConfig::default();
        config.workload.warm_keys = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidKeyPool(_))));

        let mut config = LoadConfig::default();
        config.target.cache_header = "bad header".to_string();
        assert!(config.validate().is_err());

        let mut config = LoadConfig::default();
        config.thresholds = vec![ThresholdSpec::new("http_req_duration", &["p(95)~50"])];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let mut config = LoadConfig::default();
        config.load.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_source_error() {
        let file = write_config("[workload]\nread_ratio = \"lots\"\n");
        assert!(matches!(
            LoadConfig::from_file(file.path()),
            Err(ConfigError::Source(_))
        ));
    }
}
