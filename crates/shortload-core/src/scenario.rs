//! Request classes used to segment traffic and metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cache tier a read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadTier {
    /// Small, frequently accessed pool; expected to stay cached.
    Hot,
    /// Medium pool; partially cached.
    Warm,
    /// Long tail sampled from a large keyspace; mostly cache misses.
    Cold,
}

impl ReadTier {
    pub const ALL: [ReadTier; 3] = [ReadTier::Hot, ReadTier::Warm, ReadTier::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }
}

/// Labeled category of synthetic request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    Hot,
    Warm,
    Cold,
    Write,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Hot,
        Scenario::Warm,
        Scenario::Cold,
        Scenario::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Write => "write",
        }
    }

    /// Redirect lookups (everything except shorten).
    pub fn is_read(&self) -> bool {
        !matches!(self, Self::Write)
    }
}

impl From<ReadTier> for Scenario {
    fn from(tier: ReadTier) -> Self {
        match tier {
            ReadTier::Hot => Self::Hot,
            ReadTier::Warm => Self::Warm,
            ReadTier::Cold => Self::Cold,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            "write" | "shorten" => Ok(Self::Write),
            other => Err(format!(
                "unknown scenario '{}', expected hot, warm, cold or write",
                other
            )),
        }
    }
}
