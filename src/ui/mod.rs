//! Terminal output for the CLI
//!
//! Uses `cliclack` and `indicatif` when attached to a terminal and falls back
//! to plain tagged lines (`[OK]`, `[WARN]`, ...) in CI or when piped.
//!
//! ```rust,ignore
//! use rollgate::ui::{self, StepKind, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "rollgate run");
//! ui::step_detail(&ctx, StepKind::Ok, "Artifact cached", "3f2a9c1d");
//! ui::outro(&ctx, StepKind::Ok, "Promoted to production");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{intro, key_value, outro, remark, step, step_detail, step_hint, StepKind};
pub use progress::{RolloutProgress, TaskSpinner};
pub use prompts::confirm;
