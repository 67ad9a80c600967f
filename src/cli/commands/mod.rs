//! CLI command implementations

pub mod build;
pub mod clean;
pub mod config;
pub mod fingerprint;
pub mod status;

pub use build::execute as build;
pub use clean::execute as clean;
pub use config::execute as config;
pub use fingerprint::execute as fingerprint;
pub use status::execute as status;

use crate::cache::discover_sources;
use crate::config::schema::DiscoverConfig;
use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};

/// Expand command-line paths into sources
///
/// Files are taken as given; directories are searched with the discovery
/// rules. No paths means the current directory. Each source appears once,
/// however many of the paths reach it.
pub(crate) fn collect_sources(paths: &[PathBuf], config: &DiscoverConfig) -> KilnResult<Vec<PathBuf>> {
    let cwd;
    let roots: Vec<&Path> = if paths.is_empty() {
        cwd = std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?;
        vec![cwd.as_path()]
    } else {
        paths.iter().map(PathBuf::as_path).collect()
    };

    let mut sources = Vec::new();
    for root in roots {
        if !root.exists() {
            return Err(KilnError::SourceNotFound(root.to_path_buf()));
        }
        let root = std::path::absolute(root)
            .map_err(|e| KilnError::io(format!("resolving {}", root.display()), e))?;
        if root.is_dir() {
            sources.extend(discover_sources(&root, config)?);
        } else {
            sources.push(root);
        }
    }
    sources.sort();
    sources.dedup();
    Ok(sources)
}
