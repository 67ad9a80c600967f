//! Build command - compile (and load) sources through the cache

use crate::cache::{Artifact, CompileCache};
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::library::Library;
use crate::ui::{self, BuildProgress, UiContext};
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let sources = super::collect_sources(&args.paths, &config.discover)?;

    if sources.is_empty() {
        ui::step_warn_hint(
            &ctx,
            "No sources found",
            &format!("Start a source with a `// {}` comment", config.discover.marker),
        );
        return Ok(());
    }

    let cache = CompileCache::from_config(config);
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.build.timeout());
    let jobs = args.jobs.unwrap_or(config.build.jobs).max(1);
    let load = !args.no_load;

    info!("Building {} source(s) with {} job(s)", sources.len(), jobs);
    let progress = BuildProgress::new(&ctx, sources.len() as u64);

    let mut builds = stream::iter(sources)
        .map(|source| {
            let cache = cache.clone();
            async move {
                let task_source = source.clone();
                let result = tokio::task::spawn_blocking(move || {
                    build_one(&cache, &task_source, timeout, load)
                })
                .await
                .unwrap_or_else(|e| Err(KilnError::Internal(format!("build task failed: {}", e))));
                (source, result)
            }
        })
        .buffer_unordered(jobs);

    let mut failures: Vec<(PathBuf, KilnError)> = Vec::new();
    while let Some((source, result)) = builds.next().await {
        progress.on_finished(&source);
        match result {
            Ok(artifact) => progress.println(&format!("Built: {}", artifact.path.display())),
            Err(e) => failures.push((source, e)),
        }
    }
    progress.finish();

    if failures.is_empty() {
        return Ok(());
    }

    failures.sort_by(|a, b| a.0.cmp(&b.0));
    for (source, e) in failures.iter().skip(1) {
        ui::step_error_detail(&ctx, &source.display().to_string(), &e.to_string());
    }
    // Surface the first failure as the command's error
    let (_, first) = failures.swap_remove(0);
    Err(first)
}

fn build_one(cache: &CompileCache, source: &Path, timeout: Duration, load: bool) -> KilnResult<Artifact> {
    let artifact = cache.ensure_built(source, timeout)?;
    if load {
        // SAFETY: the library was built from a source the user asked to load;
        // its initializers run in this short-lived process and no symbols
        // outlive the handle.
        let library = unsafe { Library::open(&artifact.path)? };
        debug!("Loaded {}", library.path().display());
    }
    Ok(artifact)
}
