//! Audit command - print recent audit records

use crate::audit::AuditLog;
use crate::cli::args::AuditArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{RollgateError, RollgateResult};
use crate::ui::{self, StepKind, UiContext};
use console::style;

/// Execute the audit command
pub async fn execute(args: AuditArgs, config: &Config) -> RollgateResult<()> {
    let ctx = UiContext::detect();
    let path = ConfigManager::audit_log_path();

    let records = AuditLog::tail(&path, args.lines)
        .await
        .map_err(|e| RollgateError::io(format!("reading audit log {}", path.display()), e))?;

    if records.is_empty() {
        if config.general.audit_log {
            ui::step(&ctx, StepKind::Info, "No audit records yet");
        } else {
            ui::step_hint(
                &ctx,
                StepKind::Info,
                "Audit logging is disabled",
                "Set general.audit_log = true",
            );
        }
        return Ok(());
    }

    for record in records {
        println!(
            "{} {:<20} {}",
            style(record.timestamp().format("%Y-%m-%d %H:%M:%S")).dim(),
            style(record.event()).cyan(),
            record.data()
        );
    }
    Ok(())
}
