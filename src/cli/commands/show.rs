//! Show command - one run in detail

use crate::cli::args::{OutputFormat, ShowArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{RollgateError, RollgateResult};
use crate::rollout::{Disposition, StageOutcome};
use crate::run::{PipelineRun, RunArchive, RunStatus};
use crate::ui::{self, StepKind, UiContext};
use console::{style, StyledObject};

/// Execute the show command
pub async fn execute(args: ShowArgs, _config: &Config) -> RollgateResult<()> {
    let archive = RunArchive::new(ConfigManager::runs_dir());
    let run = archive
        .find(&args.run)
        .await?
        .ok_or_else(|| RollgateError::User(format!("No recorded run matches '{}'", args.run)))?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run)?),
        OutputFormat::Plain => println!("{} {}", run.id, run.status),
        OutputFormat::Table => print_run(&UiContext::detect(), &run),
    }
    Ok(())
}

/// Status word coloured by outcome
pub(crate) fn styled_status(status: RunStatus) -> StyledObject<RunStatus> {
    match status {
        RunStatus::Succeeded => style(status).green(),
        RunStatus::Failed => style(status).red(),
        RunStatus::Cancelled => style(status).dim(),
        RunStatus::Queued | RunStatus::Building | RunStatus::Deploying => style(status).yellow(),
    }
}

/// Human-readable report of a run
pub(crate) fn print_run(ctx: &UiContext, run: &PipelineRun) {
    ui::intro(ctx, &format!("Run {}", run.short_id()));
    ui::key_value(ctx, "id", &run.id.to_string());
    ui::key_value(ctx, "status", &styled_status(run.status).to_string());
    ui::key_value(ctx, "group", &run.group);
    ui::key_value(ctx, "source", &run.source_ref);
    ui::key_value(
        ctx,
        "started",
        &run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    ui::key_value(ctx, "duration", &format!("{}s", run.duration().num_seconds()));

    if let Some(artifact) = &run.artifact {
        let origin = match run.cache_hit {
            Some(true) => "cache hit",
            _ => "built",
        };
        ui::key_value(
            ctx,
            "artifact",
            &format!(
                "{} ({}, {} bytes)",
                &artifact.digest[..artifact.digest.len().min(12)],
                origin,
                artifact.size
            ),
        );
    }

    if let Some(rollout) = &run.rollout {
        for (index, env) in rollout.environments.iter().enumerate() {
            let outcome = match rollout.outcomes.get(index) {
                Some(StageOutcome::Passed) => style("promoted").green(),
                Some(StageOutcome::Failed) => style("rolled back").red(),
                _ if index == rollout.current_stage && !rollout.disposition.is_terminal() => {
                    style("in progress").yellow()
                }
                _ => style("not reached").dim(),
            };
            let attempts = rollout.attempts.get(index).copied().unwrap_or(0);
            ui::key_value(
                ctx,
                &format!("stage {}", index + 1),
                &format!("{:<14} {} (attempts: {})", env, outcome, attempts),
            );
        }
        if let Disposition::Cancelled { stage } = &rollout.disposition {
            if let Some(env) = rollout.environments.get(*stage) {
                ui::remark(ctx, &format!("cancelled at {}", env));
            }
        }
    }

    if let Some(successor) = run.superseded_by {
        ui::remark(ctx, &format!("superseded by run {}", successor));
    }

    match (&run.failure, run.status) {
        (Some(failure), _) => {
            let location = failure
                .stage
                .as_deref()
                .map(|stage| format!(" at {}", stage))
                .unwrap_or_default();
            ui::step_detail(
                ctx,
                StepKind::Fail,
                &format!("{}{}", failure.reason_code, location),
                &failure.message,
            );
        }
        (None, RunStatus::Succeeded) => ui::step(ctx, StepKind::Ok, "Run succeeded"),
        (None, _) => {}
    }
}
