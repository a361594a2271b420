//! Rollout state and outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a stage is in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Pending,
    Deploying,
    HealthChecking,
    Promoted,
    RolledBack,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::HealthChecking => "health_checking",
            Self::Promoted => "promoted",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Result recorded for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Pending,
    Passed,
    Failed,
}

/// Why a rollout was rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    CredentialDenied,
    DeployActionFailure,
    HealthCheckFailure,
    HealthCheckTimeout,
    ApprovalTimeout,
    ApprovalRejected,
}

impl RollbackReason {
    /// Stable code forwarded to notification sinks
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::CredentialDenied => "credential_denied",
            Self::DeployActionFailure => "deploy_action_failure",
            Self::HealthCheckFailure => "health_check_failure",
            Self::HealthCheckTimeout => "health_check_timeout",
            Self::ApprovalTimeout => "approval_timeout",
            Self::ApprovalRejected => "approval_rejected",
        }
    }

    /// Whether another attempt at the same stage may help
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeployActionFailure | Self::HealthCheckFailure | Self::HealthCheckTimeout
        )
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::CredentialDenied => "credential denied",
            Self::DeployActionFailure => "deploy action failure",
            Self::HealthCheckFailure => "health check failure",
            Self::HealthCheckTimeout => "health check timeout",
            Self::ApprovalTimeout => "approval timeout",
            Self::ApprovalRejected => "approval rejected",
        };
        f.write_str(message)
    }
}

/// Overall result of a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    InProgress,
    Promoted,
    RolledBack { stage: usize, reason: RollbackReason },
    Cancelled { stage: usize },
}

impl Disposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub stage: usize,
    pub phase: StagePhase,
}

/// Snapshot of a rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutState {
    pub current_stage: usize,
    pub phase: StagePhase,
    pub environments: Vec<String>,
    pub outcomes: Vec<StageOutcome>,
    pub attempts: Vec<u32>,
    pub disposition: Disposition,
    pub history: Vec<Transition>,
}

impl RolloutState {
    /// Initial state for a plan with the given environments
    pub fn new(environments: Vec<String>) -> Self {
        let stages = environments.len();
        Self {
            current_stage: 0,
            phase: StagePhase::Pending,
            environments,
            outcomes: vec![StageOutcome::Pending; stages],
            attempts: vec![0; stages],
            disposition: Disposition::InProgress,
            history: vec![Transition {
                stage: 0,
                phase: StagePhase::Pending,
            }],
        }
    }

    /// Move to `phase` at `stage` and record it
    pub(crate) fn enter(&mut self, stage: usize, phase: StagePhase) {
        self.current_stage = stage;
        self.phase = phase;
        self.history.push(Transition { stage, phase });
    }

    /// Environments that reached Promoted
    pub fn promoted(&self) -> Vec<&str> {
        self.environments
            .iter()
            .zip(&self.outcomes)
            .filter(|(_, outcome)| **outcome == StageOutcome::Passed)
            .map(|(env, _)| env.as_str())
            .collect()
    }

    /// Whether `environment` ever entered Deploying
    pub fn reached_deploying(&self, environment: &str) -> bool {
        let Some(index) = self.environments.iter().position(|e| e == environment) else {
            return false;
        };
        self.history
            .iter()
            .any(|t| t.stage == index && t.phase == StagePhase::Deploying)
    }

    /// Environment of the current stage
    pub fn current_environment(&self) -> Option<&str> {
        self.environments.get(self.current_stage).map(String::as_str)
    }
}
