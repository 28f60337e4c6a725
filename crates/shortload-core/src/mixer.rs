//! Weighted request-class selection
//!
//! Two-level choice, mirroring how the traffic is described:
//! - a single coin flip decides read vs write (`read_ratio`)
//! - reads pick a cache tier from a cumulative-probability table

use crate::error::ConfigError;
use crate::scenario::{ReadTier, Scenario};
use rand::Rng;

/// Tolerance for weights summing to 1.0.
pub const WEIGHT_EPSILON: f64 = 1e-9;

/// Ordered `(tier, cumulative upper bound)` table.
///
/// Bounds are monotonically non-decreasing and the last one is exactly `1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioWeights {
    table: Vec<(ReadTier, f64)>,
}

impl ScenarioWeights {
    /// Build the cumulative table from per-tier weights.
    pub fn new(weights: &[(ReadTier, f64)]) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::InvalidWeights(
                "at least one scenario weight is required".to_string(),
            ));
        }

        let mut table = Vec::with_capacity(weights.len());
        let mut cumulative = 0.0_f64;
        for (tier, weight) in weights {
            if !weight.is_finite() || *weight < 0.0 || *weight > 1.0 {
                return Err(ConfigError::InvalidWeights(format!(
                    "weight for {} must be within [0, 1], got {}",
                    tier, weight
                )));
            }
            if table.iter().any(|(seen, _)| seen == tier) {
                return Err(ConfigError::InvalidWeights(format!(
                    "duplicate weight for {}",
                    tier
                )));
            }
            cumulative += weight;
            table.push((*tier, cumulative));
        }

        if (cumulative - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ConfigError::InvalidWeights(format!(
                "scenario weights sum to {}, expected 1.0",
                cumulative
            )));
        }

        // Absorb float drift so every draw in [0, 1) lands in the table.
        if let Some(last) = table.last_mut() {
            last.1 = 1.0;
        }

        Ok(Self { table })
    }

    /// Hot/warm/cold split, in that order.
    pub fn tiered(hot: f64, warm: f64, cold: f64) -> Result<Self, ConfigError> {
        Self::new(&[
            (ReadTier::Hot, hot),
            (ReadTier::Warm, warm),
            (ReadTier::Cold, cold),
        ])
    }

    /// First tier whose cumulative bound exceeds `draw` (expected in `[0, 1)`).
    pub fn choose(&self, draw: f64) -> ReadTier {
        self.table
            .iter()
            .find(|(_, bound)| draw < *bound)
            .or_else(|| self.table.last())
            .map(|(tier, _)| *tier)
            .unwrap_or(ReadTier::Hot)
    }

    /// The cumulative table.
    pub fn entries(&self) -> &[(ReadTier, f64)] {
        &self.table
    }

    /// Individual (non-cumulative) weight of a tier, 0.0 if absent.
    pub fn weight_of(&self, tier: ReadTier) -> f64 {
        let mut previous = 0.0;
        for (entry, bound) in &self.table {
            if *entry == tier {
                return bound - previous;
            }
            previous = *bound;
        }
        0.0
    }
}

/// Picks the scenario for each virtual-user iteration.
#[derive(Debug, Clone)]
pub struct RequestMixer {
    read_ratio: f64,
    weights: ScenarioWeights,
}

impl RequestMixer {
    pub fn new(read_ratio: f64, weights: ScenarioWeights) -> Result<Self, ConfigError> {
        if !read_ratio.is_finite() || !(0.0..=1.0).contains(&read_ratio) {
            return Err(ConfigError::InvalidWeights(format!(
                "read ratio must be within [0, 1], got {}",
                read_ratio
            )));
        }
        Ok(Self {
            read_ratio,
            weights,
        })
    }

    /// Weighted coin flip for read vs write, then a nested tier choice for reads.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Scenario {
        let roll: f64 = rng.gen();
        if roll < self.read_ratio {
            self.weights.choose(rng.gen()).into()
        } else {
            Scenario::Write
        }
    }

    pub fn read_ratio(&self) -> f64 {
        self.read_ratio
    }

    pub fn weights(&self) -> &ScenarioWeights {
        &self.weights
    }

    /// Expected share of all requests that land in `scenario`.
    pub fn expected_share(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::Write => 1.0 - self.read_ratio,
            Scenario::Hot => self.read_ratio * self.weights.weight_of(ReadTier::Hot),
            Scenario::Warm => self.read_ratio * self.weights.weight_of(ReadTier::Warm),
            Scenario::Cold => self.read_ratio * self.weights.weight_of(ReadTier::Cold),
        }
    }
}
