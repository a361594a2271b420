//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::rollout::{RolloutState, StagePhase};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner for a single long step such as the build
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.is_interactive(),
        }
    }

    /// Start spinning with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }

    /// Clear the spinner without any message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Stage-by-stage rollout progress
///
/// Fed with rollout snapshots. Shows an indicatif bar counting promoted
/// stages in a terminal, and prints each new transition once otherwise.
pub struct RolloutProgress {
    bar: Option<ProgressBar>,
    printed: usize,
}

impl RolloutProgress {
    pub fn new(ctx: &UiContext, stages: usize) -> Self {
        let bar = ctx.is_interactive().then(|| {
            let bar = ProgressBar::new(stages as u64);
            if let Ok(bar_style) = ProgressStyle::default_bar().template(
                "  {spinner:.cyan} Rolling out  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            ) {
                bar.set_style(bar_style.progress_chars("━╸─"));
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar, printed: 0 }
    }

    /// Reflect a new snapshot
    pub fn on_state(&mut self, state: &RolloutState) {
        if let Some(bar) = &self.bar {
            bar.set_position(state.promoted().len() as u64);
            if let Some(env) = state.current_environment() {
                bar.set_message(format!("{}: {}", env, state.phase));
            }
            return;
        }

        for transition in state.history.iter().skip(self.printed) {
            let env = state
                .environments
                .get(transition.stage)
                .map(String::as_str)
                .unwrap_or("?");
            println!("  {}", transition_line(env, transition.phase));
        }
        self.printed = self.printed.max(state.history.len());
    }

    /// Stop drawing while a prompt owns the terminal
    pub fn hold(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
    }

    /// Draw again after [`RolloutProgress::hold`]
    pub fn resume(&self) {
        if let Some(bar) = &self.bar {
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(120));
        }
    }

    /// Remove the bar
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn transition_line(environment: &str, phase: StagePhase) -> String {
    let phase_styled = match phase {
        StagePhase::Promoted => style(phase.to_string()).green(),
        StagePhase::RolledBack => style(phase.to_string()).red(),
        StagePhase::Pending => style(phase.to_string()).dim(),
        StagePhase::Deploying | StagePhase::HealthChecking => style(phase.to_string()).yellow(),
    };
    format!("{:<14} {}", environment, phase_styled)
}
