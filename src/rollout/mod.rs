//! Staged rollout controller
//!
//! A rollout moves one artifact through an ordered list of environments.
//! Each stage obtains a fresh credential from the broker, runs the deploy
//! action, then watches health until it passes or fails. Health failures
//! trigger a rollback of that stage only.
//!
//! # Stage phases
//!
//! | Phase | Next | Description |
//! |-------|------|-------------|
//! | Pending | Deploying | Waiting for approval and credential |
//! | Deploying | HealthChecking | Deploy action running |
//! | HealthChecking | Promoted | Probing until the health policy passes |
//! | Promoted | Pending(i+1) | Stage done, traffic stays |
//! | RolledBack | - | Terminal, reason recorded |

pub mod approval;
pub mod controller;
pub mod executor;
pub mod plan;
pub mod state;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalWait};
pub use controller::{ControllerSettings, RolloutController, RolloutRequest};
pub use executor::{
    ActionOutcome, AlwaysHealthy, DeployExecutor, DeployKind, DeployRequest, HealthProbe,
    ProbeOutcome, ProbeRequest, ShellExecutor, ShellProbe,
};
pub use plan::{HealthPolicy, RolloutPlan, Stage};
pub use state::{
    Disposition, RollbackReason, RolloutState, StageOutcome, StagePhase, Transition,
};
