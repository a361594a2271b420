//! Pipeline run records

use crate::cache::ArtifactRef;
use crate::rollout::RolloutState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Building,
    Deploying,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether the status can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.pad(name)
    }
}

/// Why a run failed or was cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Environment the failure happened in, if it happened during rollout
    pub stage: Option<String>,

    /// Stable machine-readable code
    pub reason_code: String,

    /// Human-readable detail
    pub message: String,
}

/// One pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run ID
    pub id: Uuid,

    /// Source reference that triggered the run
    pub source_ref: String,

    /// Concurrency group; one live run per group
    pub group: String,

    /// Current status
    pub status: RunStatus,

    /// When the run was triggered
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether the artifact came from the cache
    pub cache_hit: Option<bool>,

    /// Artifact handed to the rollout
    pub artifact: Option<ArtifactRef>,

    /// Latest rollout snapshot
    pub rollout: Option<RolloutState>,

    /// Failure or cancellation detail
    pub failure: Option<FailureReport>,

    /// Run that superseded this one in its group
    pub superseded_by: Option<Uuid>,
}

impl PipelineRun {
    /// Create a queued run
    pub fn new(source_ref: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.into(),
            group: group.into(),
            status: RunStatus::Queued,
            started_at: Utc::now(),
            finished_at: None,
            cache_hit: None,
            artifact: None,
            rollout: None,
            failure: None,
            superseded_by: None,
        }
    }

    /// Short form of the run ID for display
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// Wall-clock duration, up to now for live runs
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Move to `status` unless the run is already terminal
    ///
    /// Returns whether the status changed.
    pub(crate) fn advance(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}
