//! Clean command - remove stale artifacts and abandoned build state

use crate::cache::{find_leftovers, Leftover};
use crate::cli::args::CleanArgs;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::fingerprint::{FingerprintProvider, ToolchainFingerprint};
use crate::ui::{self, TaskSpinner, UiContext};
use std::time::Duration;
use tracing::warn;

/// Execute the clean command
pub async fn execute(args: CleanArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);

    let dir = match args.dir {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| KilnError::io("getting current directory", e))?,
    };
    let fingerprint = ToolchainFingerprint::from_config(&config.fingerprint).fingerprint()?;
    let expiry = Duration::from_secs(config.build.lock_expiry_secs);

    let leftovers = find_leftovers(&dir, &fingerprint, expiry)?;

    if leftovers.is_empty() {
        ui::step_ok(&ctx, "Nothing to clean");
        return Ok(());
    }

    if args.dry_run {
        ui::section(&ctx, "Would remove:");
        print_leftovers(&ctx, &leftovers);
        return Ok(());
    }

    ui::section(&ctx, "Found:");
    print_leftovers(&ctx, &leftovers);

    let proceed = !ctx.is_interactive()
        || ui::confirm(&ctx, &format!("Remove {} item(s)?", leftovers.len()), false).await?;
    if !proceed {
        ui::remark(&ctx, "Cancelled");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Removing {} item(s)...", leftovers.len()));

    let mut failed = 0usize;
    for leftover in &leftovers {
        if let Err(e) = leftover.remove() {
            warn!("Failed to remove {}: {}", leftover.path().display(), e);
            failed += 1;
        }
    }

    let removed = leftovers.len() - failed;
    if failed == 0 {
        spinner.stop(&format!("Removed {} item(s)", removed));
    } else {
        spinner.stop_warn(&format!("Removed {} item(s), {} failed", removed, failed));
    }

    Ok(())
}

fn print_leftovers(ctx: &UiContext, leftovers: &[Leftover]) {
    for leftover in leftovers {
        ui::key_value(ctx, &leftover.to_string(), &leftover.path().display().to_string());
    }
}
