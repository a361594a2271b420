//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::RollgateResult;
use crate::ui::{self, StepKind, UiContext};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> RollgateResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }

    Ok(())
}

/// Print the effective configuration with the trust secret masked
fn show_config(config: &Config) -> RollgateResult<()> {
    let mut shown = config.clone();
    if shown.credentials.trust_secret.is_some() {
        shown.credentials.trust_secret = Some("********".to_string());
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> RollgateResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_hint(
            &ctx,
            StepKind::Warn,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_detail(
        &ctx,
        StepKind::Ok,
        "Configuration initialized",
        &path.display().to_string(),
    );

    Ok(())
}
