//! Candidate short codes per cache tier
//!
//! Hot and warm pools are fixed for the run. Cold keys are sampled fresh on every
//! pick from a keyspace much larger than the other pools, so most cold reads miss
//! the target's cache.

use crate::error::ConfigError;
use crate::scenario::ReadTier;
use rand::Rng;

/// Largest pool that still formats as `<tier>_%06d`.
pub const MAX_POOL_SIZE: usize = 999_999;

/// Largest keyspace that still formats as `cold_%07d`.
pub const MAX_COLD_KEYSPACE: u64 = 9_999_999;

#[derive(Debug, Clone)]
pub struct KeyPools {
    hot: Vec<String>,
    warm: Vec<String>,
    cold_keyspace_size: u64,
}

impl KeyPools {
    pub fn new(
        hot_size: usize,
        warm_size: usize,
        cold_keyspace_size: u64,
    ) -> Result<Self, ConfigError> {
        for (name, size) in [("hot", hot_size), ("warm", warm_size)] {
            if size == 0 || size > MAX_POOL_SIZE {
                return Err(ConfigError::InvalidKeyPool(format!(
                    "{} pool size must be within [1, {}], got {}",
                    name, MAX_POOL_SIZE, size
                )));
            }
        }
        if cold_keyspace_size == 0 || cold_keyspace_size > MAX_COLD_KEYSPACE {
            return Err(ConfigError::InvalidKeyPool(format!(
                "cold keyspace size must be within [1, {}], got {}",
                MAX_COLD_KEYSPACE, cold_keyspace_size
            )));
        }

        Ok(Self {
            hot: (1..=hot_size).map(|i| format!("hot_{:06}", i)).collect(),
            warm: (1..=warm_size).map(|i| format!("warm_{:06}", i)).collect(),
            cold_keyspace_size,
        })
    }

    /// Pick a key for the given tier.
    pub fn pick<R: Rng + ?Sized>(&self, tier: ReadTier, rng: &mut R) -> String {
        match tier {
            ReadTier::Hot => self.hot[rng.gen_range(0..self.hot.len())].clone(),
            ReadTier::Warm => self.warm[rng.gen_range(0..self.warm.len())].clone(),
            ReadTier::Cold => cold_key(rng.gen_range(1..=self.cold_keyspace_size)),
        }
    }

    pub fn hot(&self) -> &[String] {
        &self.hot
    }

    pub fn warm(&self) -> &[String] {
        &self.warm
    }

    pub fn cold_keyspace_size(&self) -> u64 {
        self.cold_keyspace_size
    }
}

/// Format a cold key: `cold_` followed by a 7-digit zero-padded id.
pub fn cold_key(id: u64) -> String {
    format!("cold_{:07}", id)
}
