//! Status command - show the cache state of sources

use crate::cache::{ArtifactState, CompileCache, LockStatus, SourceStatus};
use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::Config;
use crate::error::KilnResult;
use crate::ui::{self, UiContext};
use console::style;
use serde_json::json;

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config) -> KilnResult<()> {
    let sources = super::collect_sources(&args.paths, &config.discover)?;
    let cache = CompileCache::from_config(config);

    let statuses = sources
        .iter()
        .map(|source| cache.status(source))
        .collect::<KilnResult<Vec<_>>>()?;

    if statuses.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No sources found");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&statuses),
        OutputFormat::Json => print_json(&statuses)?,
        OutputFormat::Plain => print_plain(&statuses),
    }

    Ok(())
}

fn lock_label(lock: &LockStatus) -> String {
    match lock {
        LockStatus::Free => "free".to_string(),
        LockStatus::Held(info) if info.pid == 0 => "held".to_string(),
        LockStatus::Held(info) => format!("held by {}:{}", info.host, info.pid),
        LockStatus::Expired(_) => "expired".to_string(),
    }
}

fn print_table(statuses: &[SourceStatus]) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Sources (fingerprint {})", statuses[0].fingerprint));

    println!(
        "{:<40} {:<10} {:<24}",
        style("SOURCE").bold(),
        style("STATE").bold(),
        style("LOCK").bold()
    );
    println!("{}", "-".repeat(76));

    for status in statuses {
        let state_styled = match status.state {
            ArtifactState::Valid => style("valid").green(),
            ArtifactState::Stale => style("stale").yellow(),
            ArtifactState::Missing => style("missing").dim(),
        };
        let source = status
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| status.source.display().to_string());

        println!(
            "{:<40} {:<10} {:<24}",
            source,
            state_styled,
            lock_label(&status.lock)
        );
    }

    println!();
    println!("{} source(s)", statuses.len());
}

fn print_json(statuses: &[SourceStatus]) -> KilnResult<()> {
    let entries: Vec<_> = statuses
        .iter()
        .map(|status| {
            json!({
                "source": status.source,
                "artifact": status.artifact,
                "lock_path": status.lock_path,
                "fingerprint": status.fingerprint,
                "state": status.state,
                "lock": lock_label(&status.lock),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn print_plain(statuses: &[SourceStatus]) {
    for status in statuses {
        println!("{}\t{}", status.state, status.source.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LockInfo;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn lock_labels() {
        assert_eq!(lock_label(&LockStatus::Free), "free");
        assert_eq!(lock_label(&LockStatus::Expired(None)), "expired");

        let info = LockInfo {
            token: Uuid::new_v4(),
            pid: 42,
            host: "box".to_string(),
            acquired_at: Utc::now(),
            expires_at: Utc::now(),
        };
        assert_eq!(lock_label(&LockStatus::Held(info)), "held by box:42");
    }
}
