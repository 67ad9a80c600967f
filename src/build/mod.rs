//! Build backends
//!
//! A backend turns one source file into exactly one shared library inside a
//! staging directory chosen by the cache. Where that file ends up, and who
//! gets to build it, is the cache's business.

mod compiler;
pub mod directives;

pub use compiler::CompilerBackend;
pub use directives::{has_marker, BuildSpec};

use crate::error::KilnResult;
use std::path::{Path, PathBuf};

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// One compile job
#[derive(Debug)]
pub struct BuildRequest<'a> {
    /// Absolute path of the main source
    pub source: &'a Path,
    /// Directives parsed from the source
    pub spec: &'a BuildSpec,
    /// Private directory the output must be written into
    pub staging_dir: &'a Path,
    /// File name the output should get inside `staging_dir`
    pub output_name: &'a str,
}

impl BuildRequest<'_> {
    /// Where the backend is expected to write its output
    pub fn output_path(&self) -> PathBuf {
        self.staging_dir.join(self.output_name)
    }
}

/// Something that can compile a source into a shared library
pub trait BuildBackend: Send + Sync {
    /// Short name recorded in build metadata
    fn name(&self) -> &str;

    /// Compile the request, returning the path of the produced file
    fn build(&self, request: &BuildRequest<'_>) -> KilnResult<PathBuf>;
}

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}
