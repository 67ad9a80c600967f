//! UI module for consistent CLI output
//!
//! Uses `cliclack` for prompts and `indicatif` for the build bar, with
//! automatic fallback to plain output in CI/non-interactive environments.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect().with_auto_yes(args.yes);
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Removing 3 item(s)...");
//! // ... do work ...
//! spinner.stop("Removed 3 item(s)");
//!
//! let yes = ui::confirm(&ctx, "Remove stale artifacts?", false).await?;
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, remark, section, step_error_detail, step_info, step_ok, step_ok_detail,
    step_warn_hint,
};
pub use progress::{BuildProgress, TaskSpinner};
pub use prompts::confirm;
