//! Line output with a cliclack rendering for terminals

use super::context::UiContext;
use console::style;

/// Severity of a reported step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Ok,
    Warn,
    Fail,
    Info,
}

impl StepKind {
    fn tag(self) -> console::StyledObject<&'static str> {
        match self {
            Self::Ok => style("[OK]").green(),
            Self::Warn => style("[WARN]").yellow(),
            Self::Fail => style("[FAIL]").red(),
            Self::Info => style("[INFO]").cyan(),
        }
    }
}

/// Heading printed before a command's output
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.is_interactive() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
    }
}

/// Closing line for a command
pub fn outro(ctx: &UiContext, kind: StepKind, message: &str) {
    if ctx.is_interactive() {
        let styled = match kind {
            StepKind::Ok => style(message).green().bold(),
            StepKind::Warn => style(message).yellow().bold(),
            StepKind::Fail => style(message).red().bold(),
            StepKind::Info => style(message).bold(),
        };
        cliclack::outro(styled).ok();
    } else {
        println!();
        println!("{} {}", kind.tag(), message);
    }
}

/// One reported step
pub fn step(ctx: &UiContext, kind: StepKind, message: &str) {
    if !ctx.is_interactive() {
        println!("  {} {}", kind.tag(), message);
        return;
    }
    let _ = match kind {
        StepKind::Ok => cliclack::log::success(message),
        StepKind::Warn => cliclack::log::warning(message),
        StepKind::Fail => cliclack::log::error(message),
        StepKind::Info => cliclack::log::info(message),
    };
}

/// A step with a dimmed detail, e.g. a path or an id
pub fn step_detail(ctx: &UiContext, kind: StepKind, message: &str, detail: &str) {
    if ctx.is_interactive() {
        step(ctx, kind, &format!("{} ({})", message, style(detail).dim()));
    } else {
        step(ctx, kind, &format!("{} ({})", message, detail));
    }
}

/// A step followed by what the user can do about it
pub fn step_hint(ctx: &UiContext, kind: StepKind, message: &str, hint: &str) {
    if ctx.is_interactive() {
        step(ctx, kind, &format!("{}\n{}", message, style(hint).dim()));
    } else {
        step(ctx, kind, message);
        println!("       {}", hint);
    }
}

/// Aligned key/value line
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.is_interactive() {
        cliclack::log::remark(format!("{:<12} {}", style(key).dim(), value)).ok();
    } else {
        println!("  {:<12} {}", key, value);
    }
}

/// Dimmed free text
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.is_interactive() {
        cliclack::log::remark(style(message).dim()).ok();
    } else {
        println!("  {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_does_not_panic() {
        let ctx = UiContext::non_interactive();
        intro(&ctx, "Runs");
        step(&ctx, StepKind::Ok, "built");
        step_detail(&ctx, StepKind::Info, "cached", "abc123");
        step_hint(&ctx, StepKind::Warn, "no runs", "rollgate run pipeline.toml");
        key_value(&ctx, "status", "succeeded");
        remark(&ctx, "done");
        outro(&ctx, StepKind::Fail, "rolled back");
    }

    #[test]
    fn tags_differ_per_kind() {
        let tags: Vec<String> = [StepKind::Ok, StepKind::Warn, StepKind::Fail, StepKind::Info]
            .iter()
            .map(|k| k.tag().to_string())
            .collect();
        assert!(tags[0].contains("OK"));
        assert!(tags[2].contains("FAIL"));
    }
}
