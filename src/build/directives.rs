//! Build directives embedded in source comments
//!
//! A source can carry its own build settings in comment lines:
//!
//! ```text
//! // kiln: flags = -std=c++17 -Wall
//! // kiln: libraries = m pthread
//! // kiln: sources = helpers.cpp
//! // kiln: depends = helpers.h
//! ```
//!
//! Paths are relative to the directory of the source that names them.

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};

const DIRECTIVE_PREFIX: &str = "kiln:";

/// Build settings declared by a source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    /// Extra compiler flags
    pub flags: Vec<String>,
    /// Libraries to link (without `-l`)
    pub libraries: Vec<String>,
    /// Extra translation units compiled into the same artifact
    pub sources: Vec<PathBuf>,
    /// Files that affect the build without being compiled
    pub depends: Vec<PathBuf>,
}

impl BuildSpec {
    /// Parse the directives in `content`, resolving paths against `source`'s directory
    pub fn parse(source: &Path, content: &str) -> KilnResult<Self> {
        let base = source.parent().unwrap_or_else(|| Path::new("."));
        let mut spec = Self::default();

        for (idx, line) in content.lines().enumerate() {
            let Some(body) = directive_body(line) else {
                continue;
            };

            let (key, value) = body
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
                .ok_or_else(|| KilnError::Directive {
                    path: source.to_path_buf(),
                    line: idx + 1,
                    reason: "expected `key = value`".to_string(),
                })?;

            let words = value.split_whitespace().map(str::to_string);
            match key {
                "flags" => spec.flags.extend(words),
                "libraries" => spec.libraries.extend(words),
                "sources" => spec.sources.extend(words.map(|w| base.join(w))),
                "depends" => spec.depends.extend(words.map(|w| base.join(w))),
                other => {
                    return Err(KilnError::Directive {
                        path: source.to_path_buf(),
                        line: idx + 1,
                        reason: format!("unknown key `{}`", other),
                    })
                }
            }
        }

        Ok(spec)
    }

    /// Every file besides the main source whose content feeds the checksum
    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .chain(self.depends.iter())
            .map(PathBuf::as_path)
    }
}

/// Strip `// kiln:` from a line, returning the rest
fn directive_body(line: &str) -> Option<&str> {
    let comment = line.trim_start().strip_prefix("//")?;
    comment.trim_start().strip_prefix(DIRECTIVE_PREFIX)
}

/// Whether the first line of `content` is a `//` comment mentioning `marker`
///
/// A trailing colon is ignored, so a first-line `// kiln: flags = -O3`
/// counts as marked.
pub fn has_marker(content: &str, marker: &str) -> bool {
    content
        .lines()
        .next()
        .and_then(|line| line.trim_start().strip_prefix("//"))
        .is_some_and(|comment| {
            comment
                .split_whitespace()
                .any(|word| word.trim_end_matches(':') == marker)
        })
}
