//! Load profiles: how many virtual users should be active over time

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time-bounded ramp target for overall concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage length in milliseconds.
    pub duration_ms: u64,

    /// Concurrency reached at the end of the stage.
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self {
            duration_ms: duration.as_millis() as u64,
            target,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Executor: maps elapsed time (or completed iterations) to active virtual users.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadModel {
    /// Piecewise-linear ramp across stages.
    RampingVus { start_vus: usize, stages: Vec<Stage> },

    /// Fixed number of users, each running a fixed number of iterations.
    PerVuIterations {
        vus: usize,
        iterations: u64,
        max_duration: Duration,
    },
}

impl LoadModel {
    /// Validated ramping profile.
    pub fn ramping(start_vus: usize, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::InvalidStages(
                "at least one stage is required".to_string(),
            ));
        }
        if total_duration(&stages).is_zero() {
            return Err(ConfigError::InvalidStages(
                "total stage duration must be > 0".to_string(),
            ));
        }
        Ok(Self::RampingVus { start_vus, stages })
    }

    /// Validated per-VU iterations profile.
    pub fn per_vu_iterations(
        vus: usize,
        iterations: u64,
        max_duration: Duration,
    ) -> Result<Self, ConfigError> {
        if vus == 0 {
            return Err(ConfigError::value("load.vus", "must be > 0"));
        }
        if iterations == 0 {
            return Err(ConfigError::value("load.iterations", "must be > 0"));
        }
        if max_duration.is_zero() {
            return Err(ConfigError::value("load.max_duration_ms", "must be > 0"));
        }
        Ok(Self::PerVuIterations {
            vus,
            iterations,
            max_duration,
        })
    }

    /// Upper bound on the run length.
    pub fn duration(&self) -> Duration {
        match self {
            Self::RampingVus { stages, .. } => total_duration(stages),
            Self::PerVuIterations { max_duration, .. } => *max_duration,
        }
    }

    /// Highest concurrency the profile ever asks for.
    pub fn max_vus(&self) -> usize {
        match self {
            Self::RampingVus { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, usize::max),
            Self::PerVuIterations { vus, .. } => *vus,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::RampingVus { start_vus, stages } => {
                let targets: Vec<String> = stages
                    .iter()
                    .map(|s| format!("{}s→{}", s.duration().as_secs_f64(), s.target))
                    .collect();
                format!("Ramping VUs from {} [{}]", start_vus, targets.join(", "))
            }
            Self::PerVuIterations {
                vus, iterations, ..
            } => format!("{} VUs × {} iterations", vus, iterations),
        }
    }
}

/// Sum of all stage durations.
pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(Stage::duration).sum()
}

/// Target concurrency at `elapsed`, linearly interpolated between consecutive
/// stage targets. The first stage ramps from `start_vus`; past the last stage
/// the last target holds.
pub fn target_concurrency(stages: &[Stage], start_vus: usize, elapsed: Duration) -> usize {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for stage in stages {
        let stage_end = stage_start + stage.duration();
        if elapsed < stage_end {
            let into = (elapsed - stage_start).as_secs_f64();
            let progress = into / stage.duration().as_secs_f64();
            let delta = (stage.target as f64 - from as f64) * progress;
            return (from as f64 + delta).round().max(0.0) as usize;
        }
        from = stage.target;
        stage_start = stage_end;
    }

    from
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_single_ramp_up() {
        let stages = vec![Stage::new(secs(10), 100)];

        assert_eq!(target_concurrency(&stages, 0, secs(0)), 0);
        assert_eq!(target_concurrency(&stages, 0, secs(5)), 50); // Midpoint
        assert_eq!(target_concurrency(&stages, 0, secs(10)), 100);
        assert_eq!(target_concurrency(&stages, 0, secs(30)), 100); // After ramp
    }

    #[test]
    fn test_ramp_up_hold_ramp_down() {
        let stages = vec![
            Stage::new(secs(30), 500),
            Stage::new(secs(60), 1000),
            Stage::new(secs(60), 500),
            Stage::new(secs(30), 0),
        ];

        assert_eq!(target_concurrency(&stages, 0, secs(15)), 250);
        assert_eq!(target_concurrency(&stages, 0, secs(30)), 500);
        assert_eq!(target_concurrency(&stages, 0, secs(60)), 750);
        assert_eq!(target_concurrency(&stages, 0, secs(90)), 1000);
        assert_eq!(target_concurrency(&stages, 0, secs(120)), 750);
        assert_eq!(target_concurrency(&stages, 0, secs(165)), 250);
        assert_eq!(target_concurrency(&stages, 0, secs(180)), 0);
    }

    #[test]
    fn test_start_vus_and_flat_stage() {
        let stages = vec![Stage::new(secs(10), 20), Stage::new(secs(10), 20)];
        assert_eq!(target_concurrency(&stages, 10, secs(0)), 10);
        assert_eq!(target_concurrency(&stages, 10, secs(5)), 15);
        assert_eq!(target_concurrency(&stages, 10, secs(15)), 20);
    }

    #[test]
    fn test_zero_length_stage_jumps() {
        let stages = vec![Stage::new(Duration::ZERO, 40), Stage::new(secs(10), 0)];
        assert_eq!(target_concurrency(&stages, 0, secs(0)), 40);
        assert_eq!(target_concurrency(&stages, 0, secs(5)), 20);
    }

    #[test]
    fn test_model_validation() {
        assert!(LoadModel::ramping(0, vec![]).is_err());
        assert!(LoadModel::ramping(0, vec![Stage::new(Duration::ZERO, 5)]).is_err());
        assert!(LoadModel::per_vu_iterations(0, 10, secs(1)).is_err());
        assert!(LoadModel::per_vu_iterations(2, 0, secs(1)).is_err());

        let model = LoadModel::ramping(5, vec![Stage::new(secs(2), 3), Stage::new(secs(3), 8)])
            .unwrap();
        assert_eq!(model.duration(), secs(5));
        assert_eq!(model.max_vus(), 8);
    }
}
