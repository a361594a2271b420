//! Runs command - list recorded runs

use crate::cli::args::{OutputFormat, RunsArgs};
use crate::cli::commands::show::styled_status;
use crate::config::{Config, ConfigManager};
use crate::error::RollgateResult;
use crate::run::{PipelineRun, RunArchive};
use crate::ui::{self, StepKind, UiContext};
use console::style;

/// Execute the runs command
pub async fn execute(args: RunsArgs, config: &Config) -> RollgateResult<()> {
    let archive = RunArchive::new(ConfigManager::runs_dir());
    let mut runs = archive.list_all().await?;
    if !args.all {
        runs.truncate(config.runs.retain.max(1));
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Plain => {
            for run in &runs {
                println!("{}", run.id);
            }
        }
        OutputFormat::Table if runs.is_empty() => {
            ui::step_hint(
                &UiContext::detect(),
                StepKind::Info,
                "No recorded runs",
                "Run: rollgate run <pipeline.toml>",
            );
        }
        OutputFormat::Table => print_table(&runs),
    }

    Ok(())
}

fn print_table(runs: &[PipelineRun]) {
    println!(
        "{:<10} {:<12} {:<16} {:<16} {:<17} {:>8}  {}",
        style("ID").bold(),
        style("STATUS").bold(),
        style("GROUP").bold(),
        style("SOURCE").bold(),
        style("STARTED").bold(),
        style("TIME").bold(),
        style("DETAIL").bold()
    );
    println!("{}", "-".repeat(96));

    for run in runs {
        println!(
            "{:<10} {:<12} {:<16} {:<16} {:<17} {:>7}s  {}",
            run.short_id(),
            styled_status(run.status),
            truncate(&run.group, 16),
            truncate(&run.source_ref, 16),
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.duration().num_seconds(),
            detail(run)
        );
    }

    println!();
    println!("{} run(s)", runs.len());
}

/// Where and why a run stopped, or where it is now
fn detail(run: &PipelineRun) -> String {
    if let Some(failure) = &run.failure {
        return match &failure.stage {
            Some(stage) => format!("{} at {}", failure.reason_code, stage),
            None => failure.reason_code.clone(),
        };
    }
    match &run.rollout {
        Some(rollout) => rollout.promoted().join(" > "),
        None if run.cache_hit == Some(true) => "cache hit".to_string(),
        None => String::new(),
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::FailureReport;

    #[test]
    fn detail_prefers_failure() {
        let mut run = PipelineRun::new("v1", "web");
        assert_eq!(detail(&run), "");

        run.failure = Some(FailureReport {
            stage: Some("canary".into()),
            reason_code: "health_check_timeout".into(),
            message: String::new(),
        });
        assert_eq!(detail(&run), "health_check_timeout at canary");
    }

    #[test]
    fn truncate_long_values() {
        assert_eq!(truncate("main", 16), "main");
        assert_eq!(truncate("feature/very-long-branch", 8), "feature…");
    }
}
