//! Run coordinator
//!
//! Owns the process-wide run table. Each triggered run executes as its own
//! tokio task: build (or cache hit), then rollout. At most one run per
//! concurrency group is live; triggering into a busy group cancels the older
//! run, and the newer run does not start deploying until the older one has
//! stopped.

use crate::audit::AuditLog;
use crate::cache::{Artifact, BuildInputs, CacheKey, CacheLookup, CacheStore};
use crate::config::schema::Config;
use crate::credentials::broker::clamped_seconds;
use crate::credentials::TrustAnchor;
use crate::error::{RollgateError, RollgateResult};
use crate::rollout::{
    Disposition, RolloutController, RolloutPlan, RolloutRequest, RolloutState,
};
use crate::run::archive::RunArchive;
use crate::run::builder::{BuildRequest, Builder};
use crate::run::notify::{NotificationSink, RunNotification};
use crate::run::state::{FailureReport, PipelineRun, RunStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinator limits and switches
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub build_timeout: Duration,
    pub identity_ttl: chrono::Duration,
    pub retain: usize,
    pub cache_enabled: bool,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            build_timeout: Duration::from_secs(config.runs.build_timeout_secs),
            identity_ttl: clamped_seconds(config.credentials.identity_ttl_secs),
            retain: config.runs.retain,
            cache_enabled: config.cache.enabled,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collaborators the coordinator drives
pub struct CoordinatorParts {
    pub cache: Arc<CacheStore>,
    pub builder: Arc<dyn Builder>,
    pub controller: Arc<RolloutController>,
    pub anchor: Arc<TrustAnchor>,
    pub audit: Arc<AuditLog>,
    pub sinks: Vec<Arc<dyn NotificationSink>>,
    pub archive: Option<RunArchive>,
}

/// What to run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source_ref: String,
    pub group: String,
    pub inputs: BuildInputs,
    pub plan: Option<RolloutPlan>,
    /// Environments approved up front
    pub pre_approved: Vec<String>,
}

impl RunRequest {
    pub fn new(source_ref: impl Into<String>, group: impl Into<String>, inputs: BuildInputs) -> Self {
        Self {
            source_ref: source_ref.into(),
            group: group.into(),
            inputs,
            plan: None,
            pre_approved: Vec::new(),
        }
    }

    pub fn with_plan(mut self, plan: RolloutPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn approve(mut self, environment: impl Into<String>) -> Self {
        self.pre_approved.push(environment.into());
        self
    }
}

/// How a run's task ended
enum Outcome {
    Succeeded,
    Failed(FailureReport),
    Cancelled(Option<FailureReport>),
}

struct LiveRun {
    run: PipelineRun,
    cancel: CancellationToken,
    rollout: Option<watch::Receiver<RolloutState>>,
    done: watch::Receiver<bool>,
}

impl LiveRun {
    fn snapshot(&self) -> PipelineRun {
        let mut run = self.run.clone();
        if let Some(rx) = &self.rollout {
            run.rollout = Some(rx.borrow().clone());
        }
        run
    }
}

#[derive(Default)]
struct RunTable {
    live: HashMap<Uuid, LiveRun>,
    groups: HashMap<String, Uuid>,
    archived: VecDeque<PipelineRun>,
}

struct Inner {
    parts: CoordinatorParts,
    settings: CoordinatorSettings,
    table: Mutex<RunTable>,
}

/// Entry point for pipeline runs
#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

fn cancelled_report(message: impl Into<String>) -> FailureReport {
    FailureReport {
        stage: None,
        reason_code: "cancelled".to_string(),
        message: message.into(),
    }
}

impl RunCoordinator {
    pub fn new(parts: CoordinatorParts, settings: CoordinatorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                parts,
                settings,
                table: Mutex::new(RunTable::default()),
            }),
        }
    }

    /// Start a run, cancelling any live run in the same group
    pub async fn trigger(&self, request: RunRequest) -> RollgateResult<Uuid> {
        if let Some(plan) = &request.plan {
            plan.validate()?;
        }

        let run = PipelineRun::new(&request.source_ref, &request.group);
        let id = run.id;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let (predecessor, superseded) = {
            let mut guard = self.inner.lock_table();
            let table = &mut *guard;

            let previous = table
                .groups
                .insert(request.group.clone(), id)
                .and_then(|prev| table.live.get_mut(&prev));

            let mut superseded = None;
            let predecessor = previous.map(|live| {
                if live.run.advance(RunStatus::Cancelled) {
                    live.run.superseded_by = Some(id);
                    live.run.failure = Some(cancelled_report(format!("superseded by run {}", id)));
                    live.cancel.cancel();
                    superseded = Some(live.run.id);
                }
                live.done.clone()
            });

            table.live.insert(
                id,
                LiveRun {
                    run,
                    cancel: cancel.clone(),
                    rollout: None,
                    done: done_rx,
                },
            );
            (predecessor, superseded)
        };

        let audit = &self.inner.parts.audit;
        if let Some(old) = superseded {
            info!("Run {} superseded by {} in group {}", old, id, request.group);
            audit
                .log(
                    "run.cancelled",
                    serde_json::json!({
                        "run_id": old,
                        "reason": "superseded",
                        "superseded_by": id,
                    }),
                )
                .await;
        }
        audit
            .log(
                "run.triggered",
                serde_json::json!({
                    "run_id": id,
                    "source_ref": request.source_ref,
                    "group": request.group,
                }),
            )
            .await;
        info!("Triggered run {} for {}", id, request.source_ref);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.execute(id, &request, &cancel, predecessor).await;
            inner.finalize(id, outcome).await;
            inner.parts.controller.approvals().forget_run(id);
            done_tx.send_replace(true);
        });

        Ok(id)
    }

    /// Snapshot of a run
    pub fn status(&self, id: Uuid) -> RollgateResult<PipelineRun> {
        let table = self.inner.lock_table();
        if let Some(live) = table.live.get(&id) {
            return Ok(live.snapshot());
        }
        table
            .archived
            .iter()
            .find(|run| run.id == id)
            .cloned()
            .ok_or(RollgateError::RunNotFound(id))
    }

    /// All known runs, newest first
    pub fn list(&self) -> Vec<PipelineRun> {
        let table = self.inner.lock_table();
        let mut runs: Vec<PipelineRun> = table
            .live
            .values()
            .map(LiveRun::snapshot)
            .chain(table.archived.iter().cloned())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Cancel a live run
    ///
    /// The status flips to Cancelled immediately; the rollout stops at its
    /// next safe boundary.
    pub async fn cancel(&self, id: Uuid) -> RollgateResult<PipelineRun> {
        let snapshot = {
            let mut table = self.inner.lock_table();
            if !table.live.contains_key(&id) {
                return Err(if table.archived.iter().any(|r| r.id == id) {
                    RollgateError::RunFinished(id)
                } else {
                    RollgateError::RunNotFound(id)
                });
            }
            let live = table.live.get_mut(&id).ok_or(RollgateError::RunNotFound(id))?;
            if !live.run.advance(RunStatus::Cancelled) {
                return Err(RollgateError::RunFinished(id));
            }
            live.run.failure = Some(cancelled_report("cancelled by request"));
            live.cancel.cancel();
            live.snapshot()
        };

        info!("Cancelled run {}", id);
        self.inner
            .parts
            .audit
            .log(
                "run.cancelled",
                serde_json::json!({ "run_id": id, "reason": "requested" }),
            )
            .await;
        Ok(snapshot)
    }

    /// Approve a gated stage of a live run
    pub fn approve(&self, id: Uuid, environment: &str) -> RollgateResult<()> {
        self.ensure_active(id)?;
        if self.inner.parts.controller.approvals().approve(id, environment) {
            info!("Approved {} for run {}", environment, id);
        }
        Ok(())
    }

    /// Reject a gated stage of a live run
    pub fn reject(&self, id: Uuid, environment: &str) -> RollgateResult<()> {
        self.ensure_active(id)?;
        if self.inner.parts.controller.approvals().reject(id, environment) {
            info!("Rejected {} for run {}", environment, id);
        }
        Ok(())
    }

    fn ensure_active(&self, id: Uuid) -> RollgateResult<()> {
        let table = self.inner.lock_table();
        match table.live.get(&id) {
            Some(live) if !live.run.status.is_terminal() => Ok(()),
            Some(_) => Err(RollgateError::RunFinished(id)),
            None if table.archived.iter().any(|r| r.id == id) => Err(RollgateError::RunFinished(id)),
            None => Err(RollgateError::RunNotFound(id)),
        }
    }

    /// Wait until a run's task has finished and return its final snapshot
    pub async fn wait(&self, id: Uuid) -> RollgateResult<PipelineRun> {
        let done = {
            let table = self.inner.lock_table();
            table.live.get(&id).map(|live| live.done.clone())
        };
        if let Some(mut done) = done {
            // A dropped sender means the task is gone either way
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.status(id)
    }

    /// Delete archived run files past the configured age
    pub async fn cleanup_archive(&self, max_age_hours: u32) -> RollgateResult<u32> {
        match &self.inner.parts.archive {
            Some(archive) => archive.cleanup(max_age_hours).await,
            None => Ok(0),
        }
    }
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, RunTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a live run that is not yet terminal
    fn update_live(&self, id: Uuid, f: impl FnOnce(&mut LiveRun)) -> bool {
        let mut table = self.lock_table();
        match table.live.get_mut(&id) {
            Some(live) if !live.run.status.is_terminal() => {
                f(live);
                true
            }
            _ => false,
        }
    }

    fn advance(&self, id: Uuid, status: RunStatus) -> bool {
        let advanced = self.update_live(id, |live| {
            live.run.advance(status);
        });
        if advanced {
            debug!("Run {} -> {}", id, status);
        }
        advanced
    }

    async fn execute(
        &self,
        id: Uuid,
        request: &RunRequest,
        cancel: &CancellationToken,
        predecessor: Option<watch::Receiver<bool>>,
    ) -> Outcome {
        if !self.advance(id, RunStatus::Building) {
            return Outcome::Cancelled(None);
        }

        let built = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled(None),
            built = self.obtain_artifact(id, request) => built,
        };
        let (artifact, cache_hit) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!("Run {} build failed: {}", id, e);
                let reason_code = match e {
                    RollgateError::BuildTimeout(_) => "build_timeout",
                    _ => "build_failure",
                };
                return Outcome::Failed(FailureReport {
                    stage: None,
                    reason_code: reason_code.to_string(),
                    message: e.to_string(),
                });
            }
        };

        let artifact_ref = artifact.reference();
        self.update_live(id, |live| {
            live.run.cache_hit = Some(cache_hit);
            live.run.artifact = Some(artifact_ref.clone());
        });

        let Some(plan) = &request.plan else {
            return Outcome::Succeeded;
        };

        if let Some(mut previous) = predecessor {
            debug!("Run {} waiting for superseded run to stop", id);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled(None),
                _ = previous.wait_for(|finished| *finished) => {}
            }
        }

        let (tx, rx) = watch::channel(RolloutController::initial_state(plan));
        let deploying = self.update_live(id, |live| {
            live.run.advance(RunStatus::Deploying);
            live.rollout = Some(rx);
        });
        if !deploying || cancel.is_cancelled() {
            return Outcome::Cancelled(None);
        }
        debug!("Run {} -> {}", id, RunStatus::Deploying);

        for environment in &request.pre_approved {
            self.parts.controller.approvals().approve(id, environment);
        }

        let rollout = RolloutRequest {
            run_id: id,
            plan: plan.clone(),
            artifact: artifact_ref,
            assertion: self.parts.anchor.mint(id, self.settings.identity_ttl),
        };
        let state = self.parts.controller.execute(&rollout, cancel, &tx).await;

        let environment = |stage: usize| state.environments.get(stage).cloned();
        match &state.disposition {
            Disposition::Promoted => Outcome::Succeeded,
            Disposition::RolledBack { stage, reason } => Outcome::Failed(FailureReport {
                stage: environment(*stage),
                reason_code: reason.reason_code().to_string(),
                message: reason.to_string(),
            }),
            Disposition::Cancelled { stage } => Outcome::Cancelled(Some(FailureReport {
                stage: environment(*stage),
                reason_code: "cancelled".to_string(),
                message: "rollout cancelled".to_string(),
            })),
            Disposition::InProgress => Outcome::Failed(FailureReport {
                stage: state.current_environment().map(str::to_string),
                reason_code: "internal".to_string(),
                message: "rollout ended without a disposition".to_string(),
            }),
        }
    }

    /// Cache hit, or build and store
    async fn obtain_artifact(
        &self,
        id: Uuid,
        request: &RunRequest,
    ) -> RollgateResult<(Artifact, bool)> {
        let key = request.inputs.key();
        let cache = &self.parts.cache;

        if !self.settings.cache_enabled {
            let bytes = self.build(id, request, &key).await?;
            return Ok((Artifact::uncached(bytes, id), false));
        }

        if let CacheLookup::Hit(artifact) = cache.lookup(&key).await {
            info!("Cache hit for run {} ({})", id, key.short());
            return Ok((artifact, true));
        }

        let claim = match cache.claim(&key) {
            Some(claim) => Some(claim),
            None => {
                // Another producer got there first; wait on it once
                if let CacheLookup::Hit(artifact) = cache.lookup(&key).await {
                    info!("Cache hit for run {} ({})", id, key.short());
                    return Ok((artifact, true));
                }
                cache.claim(&key)
            }
        };

        let bytes = self.build(id, request, &key).await?;
        let artifact = match cache.store(&key, bytes.clone(), id).await {
            Ok(artifact) => artifact,
            Err(e) if e.is_soft() => {
                warn!("{}; continuing with uncached artifact", e);
                Artifact::uncached(bytes, id)
            }
            Err(e) => return Err(e),
        };
        drop(claim);

        Ok((artifact, false))
    }

    async fn build(&self, id: Uuid, request: &RunRequest, key: &CacheKey) -> RollgateResult<Vec<u8>> {
        let build = BuildRequest {
            run_id: id,
            source_ref: request.source_ref.clone(),
            cache_key: key.clone(),
        };
        match tokio::time::timeout(self.settings.build_timeout, self.parts.builder.execute(&build))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RollgateError::BuildTimeout(self.settings.build_timeout.as_secs())),
        }
    }

    /// Record the terminal status, archive the run and notify sinks
    async fn finalize(&self, id: Uuid, outcome: Outcome) {
        let run = {
            let mut guard = self.lock_table();
            let table = &mut *guard;
            let Some(live) = table.live.remove(&id) else {
                return;
            };
            let mut run = live.snapshot();

            match outcome {
                Outcome::Succeeded => {
                    run.advance(RunStatus::Succeeded);
                }
                Outcome::Failed(report) => {
                    if run.advance(RunStatus::Failed) {
                        run.failure = Some(report);
                    }
                }
                Outcome::Cancelled(report) => {
                    if run.advance(RunStatus::Cancelled) {
                        run.failure = Some(report.unwrap_or_else(|| cancelled_report("cancelled")));
                    } else if let (Some(report), Some(existing)) = (report, run.failure.as_mut()) {
                        // Keep the cancel reason, add where the rollout stopped
                        existing.stage = report.stage;
                    }
                }
            }

            if table.groups.get(&run.group) == Some(&id) {
                table.groups.remove(&run.group);
            }
            table.archived.push_back(run.clone());
            while table.archived.len() > self.settings.retain.max(1) {
                table.archived.pop_front();
            }
            run
        };

        if let Some(archive) = &self.parts.archive {
            if let Err(e) = archive.save(&run).await {
                warn!("{}", RollgateError::RunPersist(e.to_string()));
            }
        }

        let notification = RunNotification::from(&run);
        for sink in &self.parts.sinks {
            sink.notify(&notification).await;
        }

        self.parts
            .audit
            .log(
                "run.finished",
                serde_json::json!({
                    "run_id": id,
                    "status": run.status,
                    "stage": notification.stage,
                    "reason_code": notification.reason_code,
                    "cache_hit": run.cache_hit,
                }),
            )
            .await;
        info!("Run {} finished: {}", id, run.status);
    }
}
