//! Per-iteration request construction

use crate::error::ConfigError;
use crate::keys::KeyPools;
use crate::mixer::RequestMixer;
use crate::scenario::{ReadTier, Scenario};
use rand::Rng;
use std::time::Duration;

/// Statuses that count as a successful redirect lookup.
pub const REDIRECT_STATUSES: &[u16] = &[301, 302];

/// Statuses that count as a successful shorten call.
pub const SHORTEN_STATUSES: &[u16] = &[200, 201];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One fully-resolved request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub scenario: Scenario,
    pub method: Method,
    pub url: String,
    /// JSON body for writes.
    pub body: Option<String>,
    pub timeout: Duration,
    pub expected_statuses: &'static [u16],
}

impl RequestSpec {
    pub fn is_success(&self, status: u16) -> bool {
        self.expected_statuses.contains(&status)
    }
}

/// Static target settings a [`Workload`] resolves requests against.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    /// Base URL without trailing slash, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Shorten endpoint path, e.g. `/api/shorten`.
    pub shorten_path: String,
    /// Prefix for generated long URLs in shorten payloads.
    pub url_prefix: String,
    pub redirect_timeout: Duration,
    pub shorten_timeout: Duration,
}

impl TargetSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::value(
                "target.base_url",
                format!("expected an http(s) URL, got '{}'", self.base_url),
            ));
        }
        if !self.shorten_path.starts_with('/') {
            return Err(ConfigError::value(
                "target.shorten_path",
                format!("must start with '/', got '{}'", self.shorten_path),
            ));
        }
        if self.redirect_timeout.is_zero() {
            return Err(ConfigError::value("target.redirect_timeout_ms", "must be > 0"));
        }
        if self.shorten_timeout.is_zero() {
            return Err(ConfigError::value("target.shorten_timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

/// Mixer, key pools and target settings: everything needed to produce the next
/// request. Built once per run and shared read-only by all virtual users.
#[derive(Debug, Clone)]
pub struct Workload {
    mixer: RequestMixer,
    pools: KeyPools,
    target: TargetSettings,
}

impl Workload {
    pub fn new(
        mixer: RequestMixer,
        pools: KeyPools,
        mut target: TargetSettings,
    ) -> Result<Self, ConfigError> {
        target.base_url = target.base_url.trim_end_matches('/').to_string();
        target.validate()?;
        Ok(Self {
            mixer,
            pools,
            target,
        })
    }

    /// Choose a scenario and build its request.
    pub fn next_request<R: Rng + ?Sized>(&self, rng: &mut R) -> RequestSpec {
        match self.mixer.choose(rng) {
            Scenario::Hot => self.redirect(ReadTier::Hot, rng),
            Scenario::Warm => self.redirect(ReadTier::Warm, rng),
            Scenario::Cold => self.redirect(ReadTier::Cold, rng),
            Scenario::Write => self.shorten(),
        }
    }

    /// `GET /<key>` for a key from the tier's pool.
    pub fn redirect<R: Rng + ?Sized>(&self, tier: ReadTier, rng: &mut R) -> RequestSpec {
        let key = self.pools.pick(tier, rng);
        RequestSpec {
            scenario: tier.into(),
            method: Method::Get,
            url: format!("{}/{}", self.target.base_url, key),
            body: None,
            timeout: self.target.redirect_timeout,
            expected_statuses: REDIRECT_STATUSES,
        }
    }

    /// `POST <shorten_path>` with a long URL unique to this call.
    pub fn shorten(&self) -> RequestSpec {
        let long_url = format!(
            "{}/{}-{}",
            self.target.url_prefix.trim_end_matches('/'),
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        );
        RequestSpec {
            scenario: Scenario::Write,
            method: Method::Post,
            url: format!("{}{}", self.target.base_url, self.target.shorten_path),
            body: Some(serde_json::json!({ "url": long_url }).to_string()),
            timeout: self.target.shorten_timeout,
            expected_statuses: SHORTEN_STATUSES,
        }
    }

    pub fn mixer(&self) -> &RequestMixer {
        &self.mixer
    }

    pub fn pools(&self) -> &KeyPools {
        &self.pools
    }

    pub fn target(&self) -> &TargetSettings {
        &self.target
    }
}
