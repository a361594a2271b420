//! Rollout state machine
//!
//! Drives one artifact through the stages of a plan:
//!
//! ```text
//! Pending(i) -> Deploying(i) -> HealthChecking(i) -> Promoted(i) -> Pending(i+1)
//!                   |                  |
//!                   |                  +-> rollback action -> RolledBack
//!                   +-> RolledBack
//! ```
//!
//! Failed deploys and health checks re-enter `Pending(i)` until the stage's
//! `max_attempts` is spent. Cancellation is observed only between steps,
//! never in the middle of a deploy or health check, and leaves promoted
//! stages in place.

use crate::cache::ArtifactRef;
use crate::config::schema::Config;
use crate::credentials::{Action, Credential, CredentialBroker, Scope, Subject, TrustAssertion};
use crate::rollout::approval::{ApprovalDecision, ApprovalGate, ApprovalWait};
use crate::rollout::executor::{
    ActionOutcome, DeployExecutor, DeployKind, DeployRequest, HealthProbe, ProbeOutcome,
    ProbeRequest,
};
use crate::rollout::plan::{RolloutPlan, Stage};
use crate::rollout::state::{Disposition, RollbackReason, RolloutState, StageOutcome, StagePhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Timeouts applied by the controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub issue_timeout: Duration,
    pub approval_timeout: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            issue_timeout: Duration::from_secs(config.credentials.issue_timeout_secs),
            approval_timeout: Duration::from_secs(config.rollout.approval_timeout_secs),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything one rollout needs
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub run_id: Uuid,
    pub plan: RolloutPlan,
    pub artifact: ArtifactRef,
    pub assertion: TrustAssertion,
}

enum HealthResult {
    Passed,
    Failed(String),
    TimedOut,
}

/// How one attempt at a stage ended
enum Attempt {
    Promoted,
    Failed(RollbackReason),
    Cancelled,
}

/// Executes rollout plans
pub struct RolloutController {
    broker: Arc<CredentialBroker>,
    deployer: Arc<dyn DeployExecutor>,
    probe: Arc<dyn HealthProbe>,
    approvals: Arc<ApprovalGate>,
    settings: ControllerSettings,
}

impl RolloutController {
    pub fn new(
        broker: Arc<CredentialBroker>,
        deployer: Arc<dyn DeployExecutor>,
        probe: Arc<dyn HealthProbe>,
        approvals: Arc<ApprovalGate>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            broker,
            deployer,
            probe,
            approvals,
            settings,
        }
    }

    /// Gate that approval and rejection signals go through
    pub fn approvals(&self) -> &Arc<ApprovalGate> {
        &self.approvals
    }

    /// Initial state for a plan, suitable for seeding an observer channel
    pub fn initial_state(plan: &RolloutPlan) -> RolloutState {
        RolloutState::new(plan.stages().iter().map(|s| s.environment.clone()).collect())
    }

    /// Run a rollout to a terminal disposition
    ///
    /// Every transition is published on `observer`. The final state is also
    /// returned.
    pub async fn execute(
        &self,
        request: &RolloutRequest,
        cancel: &CancellationToken,
        observer: &watch::Sender<RolloutState>,
    ) -> RolloutState {
        let mut state = Self::initial_state(&request.plan);
        observer.send_replace(state.clone());

        info!(
            "Starting rollout for run {} across {} stage(s)",
            request.run_id,
            request.plan.len()
        );

        for (index, stage) in request.plan.stages().iter().enumerate() {
            if index > 0 {
                self.transition(&mut state, observer, index, StagePhase::Pending);
            }

            let mut approved = false;
            loop {
                match self
                    .attempt_stage(request, index, stage, &mut approved, &mut state, cancel, observer)
                    .await
                {
                    Attempt::Promoted => {
                        state.outcomes[index] = StageOutcome::Passed;
                        self.transition(&mut state, observer, index, StagePhase::Promoted);
                        info!("Promoted {} ({}%)", stage.environment, stage.traffic_percent);
                        break;
                    }
                    Attempt::Cancelled => {
                        return self.finish(
                            state,
                            observer,
                            Disposition::Cancelled { stage: index },
                        );
                    }
                    Attempt::Failed(reason)
                        if reason.is_retryable() && state.attempts[index] < stage.max_attempts =>
                    {
                        warn!(
                            "Stage {} attempt {}/{} failed: {}, retrying",
                            stage.environment, state.attempts[index], stage.max_attempts, reason
                        );
                        self.transition(&mut state, observer, index, StagePhase::Pending);
                    }
                    Attempt::Failed(reason) => {
                        warn!("Rolling back at {}: {}", stage.environment, reason);
                        state.outcomes[index] = StageOutcome::Failed;
                        self.transition(&mut state, observer, index, StagePhase::RolledBack);
                        return self.finish(
                            state,
                            observer,
                            Disposition::RolledBack {
                                stage: index,
                                reason,
                            },
                        );
                    }
                }
            }
        }

        self.finish(state, observer, Disposition::Promoted)
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_stage(
        &self,
        request: &RolloutRequest,
        index: usize,
        stage: &Stage,
        approved: &mut bool,
        state: &mut RolloutState,
        cancel: &CancellationToken,
        observer: &watch::Sender<RolloutState>,
    ) -> Attempt {
        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }

        if stage.requires_approval && !*approved {
            debug!("Waiting for approval of {}", stage.environment);
            match self
                .approvals
                .wait(
                    request.run_id,
                    &stage.environment,
                    self.settings.approval_timeout,
                    cancel,
                )
                .await
            {
                ApprovalWait::Decided(ApprovalDecision::Approved) => *approved = true,
                ApprovalWait::Decided(ApprovalDecision::Rejected) => {
                    return Attempt::Failed(RollbackReason::ApprovalRejected)
                }
                ApprovalWait::TimedOut => return Attempt::Failed(RollbackReason::ApprovalTimeout),
                ApprovalWait::Cancelled => return Attempt::Cancelled,
            }
        }

        let Some(credential) = self
            .obtain_credential(request, &stage.environment, Action::Deploy)
            .await
        else {
            return Attempt::Failed(RollbackReason::CredentialDenied);
        };

        state.attempts[index] += 1;
        self.transition(state, observer, index, StagePhase::Deploying);

        let deploy = DeployRequest {
            kind: DeployKind::Deploy,
            run_id: request.run_id,
            environment: stage.environment.clone(),
            traffic_percent: stage.traffic_percent,
            attempt: state.attempts[index],
            artifact: request.artifact.clone(),
            credential,
        };
        if let ActionOutcome::Failed(output) = self.deployer.execute(&deploy).await {
            warn!("Deploy to {} failed: {}", stage.environment, output);
            return Attempt::Failed(RollbackReason::DeployActionFailure);
        }

        if cancel.is_cancelled() {
            return Attempt::Cancelled;
        }

        self.transition(state, observer, index, StagePhase::HealthChecking);
        let reason = match self.check_health(request, stage).await {
            HealthResult::Passed => return Attempt::Promoted,
            HealthResult::Failed(output) => {
                warn!("Health check for {} failed: {}", stage.environment, output);
                RollbackReason::HealthCheckFailure
            }
            HealthResult::TimedOut => RollbackReason::HealthCheckTimeout,
        };

        self.roll_back(request, stage, state.attempts[index]).await;
        Attempt::Failed(reason)
    }

    /// Ask the broker for a credential, bounded by the issue timeout
    async fn obtain_credential(
        &self,
        request: &RolloutRequest,
        environment: &str,
        action: Action,
    ) -> Option<Credential> {
        let subject = Subject::new(request.run_id, environment);
        let scope = Scope::from([action]);

        let issued = tokio::time::timeout(
            self.settings.issue_timeout,
            self.broker.issue(&subject, &scope, &request.assertion),
        )
        .await;

        match issued {
            Ok(Ok(credential)) => match self.broker.validate(&credential, action) {
                Ok(()) => Some(credential),
                Err(e) => {
                    warn!("Credential for {} unusable: {}", subject, e);
                    None
                }
            },
            Ok(Err(e)) => {
                warn!("{}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Credential issuance for {} timed out after {}s",
                    subject,
                    self.settings.issue_timeout.as_secs()
                );
                None
            }
        }
    }

    async fn check_health(&self, request: &RolloutRequest, stage: &Stage) -> HealthResult {
        let probe = ProbeRequest {
            run_id: request.run_id,
            environment: stage.environment.clone(),
            traffic_percent: stage.traffic_percent,
            artifact: request.artifact.clone(),
        };

        let checks = async {
            let mut passes = 0;
            loop {
                match self.probe.execute(&probe).await {
                    ProbeOutcome::Healthy => {
                        passes += 1;
                        debug!(
                            "Health probe {}/{} passed for {}",
                            passes, stage.health.required_passes, stage.environment
                        );
                        if passes >= stage.health.required_passes {
                            return HealthResult::Passed;
                        }
                    }
                    ProbeOutcome::Unhealthy(output) => return HealthResult::Failed(output),
                }
                tokio::time::sleep(stage.health.interval()).await;
            }
        };

        tokio::time::timeout(stage.health.timeout(), checks)
            .await
            .unwrap_or(HealthResult::TimedOut)
    }

    /// Undo the current stage only; earlier stages stay promoted
    async fn roll_back(&self, request: &RolloutRequest, stage: &Stage, attempt: u32) {
        let Some(credential) = self
            .obtain_credential(request, &stage.environment, Action::Rollback)
            .await
        else {
            warn!(
                "Skipping rollback action for {}: no rollback credential",
                stage.environment
            );
            return;
        };

        let rollback = DeployRequest {
            kind: DeployKind::Rollback,
            run_id: request.run_id,
            environment: stage.environment.clone(),
            traffic_percent: stage.traffic_percent,
            attempt,
            artifact: request.artifact.clone(),
            credential,
        };
        match self.deployer.execute(&rollback).await {
            ActionOutcome::Succeeded => info!("Rolled back {}", stage.environment),
            ActionOutcome::Failed(output) => {
                warn!("Rollback action for {} failed: {}", stage.environment, output)
            }
        }
    }

    fn transition(
        &self,
        state: &mut RolloutState,
        observer: &watch::Sender<RolloutState>,
        stage: usize,
        phase: StagePhase,
    ) {
        debug!("Stage {} -> {}", stage, phase);
        state.enter(stage, phase);
        observer.send_replace(state.clone());
    }

    fn finish(
        &self,
        mut state: RolloutState,
        observer: &watch::Sender<RolloutState>,
        disposition: Disposition,
    ) -> RolloutState {
        info!("Rollout finished: {:?}", disposition);
        state.disposition = disposition;
        observer.send_replace(state.clone());
        state
    }
}
