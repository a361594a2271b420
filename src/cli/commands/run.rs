//! Run command - build a pipeline and roll it out

use crate::audit::AuditLog;
use crate::cli::args::{OutputFormat, RunArgs};
use crate::cli::commands::cache::open_store;
use crate::cli::commands::show::print_run;
use crate::config::{Config, ConfigManager};
use crate::credentials::{CredentialBroker, TrustAnchor};
use crate::error::{RollgateError, RollgateResult};
use crate::rollout::{
    AlwaysHealthy, ApprovalGate, ControllerSettings, DeployExecutor, HealthProbe,
    RolloutController, ShellExecutor, ShellProbe, StagePhase,
};
use crate::run::{
    CoordinatorParts, CoordinatorSettings, FileSink, LogSink, NotificationSink, PipelineFile,
    PipelineRun, RunArchive, RunCoordinator, RunRequest, RunStatus, ShellBuilder,
};
use crate::ui::{self, RolloutProgress, StepKind, TaskSpinner, UiContext};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// How often the terminal view refreshes from the run table
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> RollgateResult<()> {
    let pipeline = PipelineFile::load(&args.pipeline).await?;
    let plan = pipeline.plan(&config.rollout)?;
    let inputs = pipeline.build_inputs(&args.source)?;
    let group = args
        .group
        .clone()
        .unwrap_or_else(|| pipeline.group().to_string());

    let coordinator = assemble(&pipeline, config).await?;
    if config.runs.persist && config.runs.auto_cleanup_hours > 0 {
        match coordinator
            .cleanup_archive(config.runs.auto_cleanup_hours)
            .await
        {
            Ok(0) => {}
            Ok(removed) => debug!("Removed {} expired run record(s)", removed),
            Err(e) => warn!("Run archive cleanup failed: {}", e),
        }
    }

    let stages = plan.as_ref().map_or(0, |p| p.len());
    let gated: HashSet<String> = plan
        .iter()
        .flat_map(|p| p.stages())
        .filter(|s| s.requires_approval && !args.approve.contains(&s.environment))
        .map(|s| s.environment.clone())
        .collect();

    let mut request = RunRequest::new(args.source.as_str(), group, inputs);
    if let Some(plan) = plan {
        request = request.with_plan(plan);
    }
    for environment in &args.approve {
        request = request.approve(environment.as_str());
    }

    let ctx = match args.format {
        OutputFormat::Table => UiContext::detect(),
        OutputFormat::Json | OutputFormat::Plain => UiContext::non_interactive(),
    };
    let mut view = RunView::new(&ctx, stages, args.format == OutputFormat::Table);
    if view.enabled {
        ui::intro(&ctx, &format!("rollgate run: {}", pipeline.name));
    }

    let id = coordinator.trigger(request).await?;
    view.building();
    let run = follow(&coordinator, id, &mut view, &gated).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run)?),
        OutputFormat::Plain => println!("{} {}", run.id, run.status),
        OutputFormat::Table => print_run(&ctx, &run),
    }
    outcome(&run)
}

/// Wire the coordinator for one pipeline file
async fn assemble(pipeline: &PipelineFile, config: &Config) -> RollgateResult<RunCoordinator> {
    let audit = Arc::new(AuditLog::new(config));
    let anchor = Arc::new(TrustAnchor::from_config(&config.credentials)?);
    let broker = Arc::new(CredentialBroker::from_config(
        &config.credentials,
        Arc::clone(&anchor),
        Arc::clone(&audit),
    ));
    let workdir = pipeline.workdir();

    let (deployer, probe): (Arc<dyn DeployExecutor>, Arc<dyn HealthProbe>) = match &pipeline
        .deploy
    {
        Some(deploy) => {
            let timeout = Duration::from_secs(deploy.timeout_secs);
            let mut executor =
                ShellExecutor::new(deploy.command.as_str(), timeout).in_dir(workdir.clone());
            if let Some(rollback) = &deploy.rollback {
                executor = executor.with_rollback(rollback.as_str());
            }
            let probe: Arc<dyn HealthProbe> = match &deploy.health {
                Some(command) => {
                    Arc::new(ShellProbe::new(command.as_str(), timeout).in_dir(workdir.clone()))
                }
                None => Arc::new(AlwaysHealthy),
            };
            (Arc::new(executor), probe)
        }
        // Build-only pipeline: no stages, so the executor is never called
        None => (
            Arc::new(ShellExecutor::new("true", Duration::from_secs(1))),
            Arc::new(AlwaysHealthy),
        ),
    };

    let controller = Arc::new(RolloutController::new(
        broker,
        deployer,
        probe,
        Arc::new(ApprovalGate::new()),
        ControllerSettings::from_config(config),
    ));

    let settings = CoordinatorSettings::from_config(config);
    let builder = Arc::new(ShellBuilder::new(
        pipeline.build.command.as_str(),
        pipeline.build.artifact.clone(),
        workdir,
        settings.build_timeout,
    ));

    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    if let Some(path) = &config.runs.notify_file {
        sinks.push(Arc::new(FileSink::new(path.clone())));
    }

    let parts = CoordinatorParts {
        cache: Arc::new(open_store(config).await?),
        builder,
        controller,
        anchor,
        audit,
        sinks,
        archive: config
            .runs
            .persist
            .then(|| RunArchive::new(ConfigManager::runs_dir())),
    };
    Ok(RunCoordinator::new(parts, settings))
}

/// Drive the terminal until the run finishes
///
/// Ctrl-C cancels the run once; the run then stops at its next safe point
/// and this returns its final record.
async fn follow(
    coordinator: &RunCoordinator,
    id: Uuid,
    view: &mut RunView,
    gated: &HashSet<String>,
) -> RollgateResult<PipelineRun> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut asked: HashSet<String> = HashSet::new();
    let mut interrupted = false;

    let finished = coordinator.wait(id);
    tokio::pin!(finished);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            run = &mut finished => {
                let run = run?;
                view.update(&run);
                view.finish();
                return Ok(run);
            }
            signal = &mut interrupt, if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        view.interrupted();
                        match coordinator.cancel(id).await {
                            Ok(_) | Err(RollgateError::RunFinished(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            }
            _ = ticker.tick() => {
                let Ok(run) = coordinator.status(id) else {
                    continue;
                };
                view.update(&run);
                if let Some(environment) = awaiting_approval(&run, gated) {
                    if asked.insert(environment.clone()) {
                        ask_approval(coordinator, id, &environment, view).await?;
                    }
                }
            }
        }
    }
}

/// Gated environment the run is currently parked on
fn awaiting_approval(run: &PipelineRun, gated: &HashSet<String>) -> Option<String> {
    if run.status != RunStatus::Deploying {
        return None;
    }
    let rollout = run.rollout.as_ref()?;
    let environment = rollout.current_environment()?;
    let untried = rollout.attempts.get(rollout.current_stage) == Some(&0);
    (rollout.phase == StagePhase::Pending && untried && gated.contains(environment))
        .then(|| environment.to_string())
}

async fn ask_approval(
    coordinator: &RunCoordinator,
    id: Uuid,
    environment: &str,
    view: &mut RunView,
) -> RollgateResult<()> {
    if !view.ctx.is_interactive() {
        if view.enabled {
            ui::step_hint(
                &view.ctx,
                StepKind::Info,
                &format!("Waiting for approval to promote to {}", environment),
                "Pass --approve <ENV> to pre-approve gated stages",
            );
        }
        return Ok(());
    }

    view.hold();
    let answer = ui::confirm(&view.ctx, &format!("Promote to {}?", environment), false).await;
    view.resume();

    let decision = match answer {
        Ok(true) => coordinator.approve(id, environment),
        Ok(false) => coordinator.reject(id, environment),
        Err(e) => {
            debug!("Approval prompt failed: {}", e);
            coordinator.reject(id, environment)
        }
    };
    match decision {
        Ok(()) | Err(RollgateError::RunFinished(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Map the final record to the command's exit status
fn outcome(run: &PipelineRun) -> RollgateResult<()> {
    match run.status {
        RunStatus::Succeeded => Ok(()),
        RunStatus::Cancelled => Err(RollgateError::User(format!(
            "Run {} was cancelled",
            run.short_id()
        ))),
        _ => {
            let reason = run
                .failure
                .as_ref()
                .map(|f| match &f.stage {
                    Some(stage) => format!("{} at {}", f.reason_code, stage),
                    None => f.reason_code.clone(),
                })
                .unwrap_or_else(|| run.status.to_string());
            Err(RollgateError::User(format!(
                "Run {} failed: {}",
                run.short_id(),
                reason
            )))
        }
    }
}

/// Terminal rendering of a live run
struct RunView {
    ctx: UiContext,
    enabled: bool,
    stages: usize,
    spinner: TaskSpinner,
    build_pending: bool,
    rollout: Option<RolloutProgress>,
}

impl RunView {
    fn new(ctx: &UiContext, stages: usize, enabled: bool) -> Self {
        Self {
            ctx: ctx.clone(),
            enabled,
            stages,
            spinner: TaskSpinner::new(ctx),
            build_pending: false,
            rollout: None,
        }
    }

    fn building(&mut self) {
        if self.enabled {
            self.spinner.start("Building artifact...");
            self.build_pending = true;
        }
    }

    fn update(&mut self, run: &PipelineRun) {
        if !self.enabled {
            return;
        }

        if self.build_pending && !matches!(run.status, RunStatus::Queued | RunStatus::Building) {
            self.build_pending = false;
            match (&run.artifact, run.cache_hit) {
                (Some(artifact), Some(true)) => self
                    .spinner
                    .stop(&format!("Cache hit ({})", short_digest(&artifact.digest))),
                (Some(artifact), _) => self
                    .spinner
                    .stop(&format!("Built artifact ({})", short_digest(&artifact.digest))),
                (None, _) => self.spinner.stop_error("No artifact produced"),
            }
        }

        if let Some(state) = &run.rollout {
            let (ctx, stages) = (&self.ctx, self.stages);
            self.rollout
                .get_or_insert_with(|| RolloutProgress::new(ctx, stages))
                .on_state(state);
        }
    }

    fn interrupted(&mut self) {
        if !self.enabled {
            return;
        }
        if self.build_pending {
            self.build_pending = false;
            self.spinner.clear();
        }
        self.hold();
        ui::step(&self.ctx, StepKind::Warn, "Interrupted, cancelling run");
        self.resume();
    }

    fn hold(&self) {
        if let Some(progress) = &self.rollout {
            progress.hold();
        }
    }

    fn resume(&self) {
        if let Some(progress) = &self.rollout {
            progress.resume();
        }
    }

    fn finish(&self) {
        if let Some(progress) = &self.rollout {
            progress.finish();
        }
    }
}

fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::RolloutState;
    use crate::run::FailureReport;

    fn deploying_run(environments: &[&str]) -> PipelineRun {
        let mut run = PipelineRun::new("v1", "web");
        run.status = RunStatus::Deploying;
        run.rollout = Some(RolloutState::new(
            environments.iter().map(|e| e.to_string()).collect(),
        ));
        run
    }

    #[test]
    fn outcome_maps_status() {
        let mut run = PipelineRun::new("v1", "web");
        run.status = RunStatus::Succeeded;
        assert!(outcome(&run).is_ok());

        run.status = RunStatus::Failed;
        run.failure = Some(FailureReport {
            stage: Some("canary".into()),
            reason_code: "health_check_failure".into(),
            message: "probe failed".into(),
        });
        let err = outcome(&run).unwrap_err();
        assert!(err.to_string().contains("health_check_failure at canary"));

        run.status = RunStatus::Cancelled;
        assert!(outcome(&run).unwrap_err().to_string().contains("cancelled"));
    }

    #[test]
    fn approval_only_for_untried_gated_stage() {
        let gated: HashSet<String> = ["production".to_string()].into();
        let mut run = deploying_run(&["canary", "production"]);
        assert_eq!(awaiting_approval(&run, &gated), None);

        if let Some(rollout) = run.rollout.as_mut() {
            rollout.enter(1, StagePhase::Pending);
        }
        assert_eq!(awaiting_approval(&run, &gated).as_deref(), Some("production"));

        if let Some(rollout) = run.rollout.as_mut() {
            rollout.attempts[1] = 1;
        }
        assert_eq!(awaiting_approval(&run, &gated), None);
    }

    #[tokio::test]
    async fn assemble_wires_build_only_pipeline() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "name = \"web\"\n[build]\ncommand = \"true\"\nartifact = \"out\"\nlockfiles = false\n",
        )
        .unwrap();
        let pipeline = PipelineFile::load(&path).await.unwrap();

        let mut config = Config::default();
        config.cache.root = Some(temp.path().join("cache"));
        config.credentials.trust_secret = Some("s3cret".into());
        config.general.audit_log = false;
        assert!(assemble(&pipeline, &config).await.is_ok());
    }
}
