//! Rollout plans
//!
//! A plan is the ordered list of environments a release moves through. It is
//! validated once and never changes after the rollout starts.

use crate::config::schema::RolloutConfig;
use crate::error::{RollgateError, RollgateResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// When a stage counts as healthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Overall bound on health checking for one attempt
    pub timeout_secs: u64,

    /// Delay between probes
    pub interval_secs: u64,

    /// Consecutive passing probes needed to promote
    pub required_passes: u32,
}

impl HealthPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Defaults from the `[rollout]` config section
    pub fn from_config(config: &RolloutConfig) -> Self {
        Self {
            timeout_secs: config.health_timeout_secs,
            interval_secs: config.health_interval_secs,
            required_passes: 1,
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from_config(&RolloutConfig::default())
    }
}

/// One environment in a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub environment: String,
    pub traffic_percent: u8,
    pub health: HealthPolicy,
    pub requires_approval: bool,
    pub max_attempts: u32,
}

impl Stage {
    /// Stage with default health policy, no approval and a single attempt
    pub fn new(environment: impl Into<String>, traffic_percent: u8) -> Self {
        Self {
            environment: environment.into(),
            traffic_percent,
            health: HealthPolicy::default(),
            requires_approval: false,
            max_attempts: 1,
        }
    }

    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Ordered stages of a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPlan {
    stages: Vec<Stage>,
}

impl RolloutPlan {
    /// Build and validate a plan
    pub fn new(stages: Vec<Stage>) -> RollgateResult<Self> {
        let plan = Self { stages };
        plan.validate()?;
        Ok(plan)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Check structural rules that must hold before a rollout begins
    pub fn validate(&self) -> RollgateResult<()> {
        if self.stages.is_empty() {
            return Err(RollgateError::PlanInvalid(
                "plan has no stages".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            let invalid = |reason: String| {
                RollgateError::PlanInvalid(format!(
                    "stage {} ({}): {}",
                    index, stage.environment, reason
                ))
            };

            if stage.environment.trim().is_empty() {
                return Err(invalid("environment name is empty".to_string()));
            }
            if !seen.insert(stage.environment.as_str()) {
                return Err(invalid("environment appears twice".to_string()));
            }
            if stage.traffic_percent > 100 {
                return Err(invalid(format!(
                    "traffic {}% exceeds 100%",
                    stage.traffic_percent
                )));
            }
            if stage.max_attempts == 0 {
                return Err(invalid("max_attempts must be at least 1".to_string()));
            }
            if stage.health.required_passes == 0 {
                return Err(invalid("required_passes must be at least 1".to_string()));
            }
            if stage.health.timeout_secs == 0 {
                return Err(invalid("health timeout must be positive".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_plan() {
        let plan = RolloutPlan::new(vec![
            Stage::new("staging", 100),
            Stage::new("canary", 10).with_max_attempts(2),
            Stage::new("production", 100).with_approval(),
        ])
        .unwrap();

        assert_eq!(plan.len(), 3);
        assert!(plan.stages()[2].requires_approval);
    }

    #[test]
    fn empty_plan_rejected() {
        assert!(RolloutPlan::new(vec![]).is_err());
    }

    #[test]
    fn traffic_over_100_rejected() {
        let err = RolloutPlan::new(vec![Stage::new("canary", 101)]).unwrap_err();
        assert!(err.to_string().contains("exceeds 100%"));
    }

    #[test]
    fn duplicate_environment_rejected() {
        let err = RolloutPlan::new(vec![Stage::new("staging", 50), Stage::new("staging", 100)])
            .unwrap_err();
        assert!(err.to_string().contains("appears twice"));
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(RolloutPlan::new(vec![Stage::new("staging", 100).with_max_attempts(0)]).is_err());
    }

    #[test]
    fn health_defaults_follow_config() {
        let config = RolloutConfig {
            health_timeout_secs: 30,
            health_interval_secs: 2,
            approval_timeout_secs: 60,
        };
        let health = HealthPolicy::from_config(&config);
        assert_eq!(health.timeout(), Duration::from_secs(30));
        assert_eq!(health.interval(), Duration::from_secs(2));
        assert_eq!(health.required_passes, 1);
    }
}
