//! Source discovery
//!
//! Finds the sources under a directory that opted into kiln with a marker
//! comment on their first line.

use crate::build::has_marker;
use crate::config::schema::DiscoverConfig;
use crate::error::{KilnError, KilnResult};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Recursively collect eligible sources under `root`, sorted by path
pub fn discover_sources(root: &Path, config: &DiscoverConfig) -> KilnResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, config, &mut found)?;
    found.sort();
    debug!("Discovered {} sources under {}", found.len(), root.display());
    Ok(found)
}

fn walk(dir: &Path, config: &DiscoverConfig, found: &mut Vec<PathBuf>) -> KilnResult<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| KilnError::io(format!("reading directory {}", dir.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| KilnError::io("reading directory entry", e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| KilnError::io(format!("inspecting {}", path.display()), e))?;

        if file_type.is_dir() {
            // Hidden dirs include in-flight staging dirs
            if !entry.file_name().to_string_lossy().starts_with('.') {
                walk(&path, config, found)?;
            }
            continue;
        }

        if !is_candidate(&path, config) {
            continue;
        }

        if first_line_has_marker(&path, &config.marker)? {
            found.push(path);
        } else {
            info!(
                "Skipping source file as it does not start with a `// {}` comment: {}",
                config.marker,
                path.display()
            );
        }
    }

    Ok(())
}

/// Non-hidden file with one of the configured extensions
fn is_candidate(path: &Path, config: &DiscoverConfig) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| config.extensions.iter().any(|allowed| allowed == ext))
}

fn first_line_has_marker(path: &Path, marker: &str) -> KilnResult<bool> {
    let file = fs::File::open(path)
        .map_err(|e| KilnError::io(format!("opening {}", path.display()), e))?;
    let mut first = String::new();
    // Non-UTF-8 first line: not one of ours
    if BufReader::new(file).read_line(&mut first).is_err() {
        return Ok(false);
    }
    Ok(has_marker(&first, marker))
}
