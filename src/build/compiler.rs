//! Compiler-driver backend
//!
//! Invokes `cc` for C sources and `c++` for everything else with
//! `-shared -fPIC`, the configured flags, and the source's own directives.

use super::{build_error_output, BuildBackend, BuildRequest};
use crate::config::schema::BuildConfig;
use crate::error::{KilnError, KilnResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Build backend that shells out to the system compiler
#[derive(Debug, Clone)]
pub struct CompilerBackend {
    cc: String,
    cxx: String,
    flags: Vec<String>,
    libraries: Vec<String>,
}

impl CompilerBackend {
    /// Create a backend from config
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            cc: config.cc.clone(),
            cxx: config.cxx.clone(),
            flags: config.flags.clone(),
            libraries: config.libraries.clone(),
        }
    }

    /// Compiler driver for a source, chosen by extension
    fn compiler_for(&self, source: &Path) -> &str {
        match source.extension().and_then(|e| e.to_str()) {
            Some("c") => &self.cc,
            _ => &self.cxx,
        }
    }

    /// Full argument list for a request (compiler excluded)
    fn arguments(&self, request: &BuildRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        args.extend(self.flags.iter().map(OsString::from));
        args.extend(request.spec.flags.iter().map(OsString::from));
        args.push("-shared".into());
        args.push("-fPIC".into());
        if cfg!(target_os = "macos") {
            args.push("-undefined".into());
            args.push("dynamic_lookup".into());
        }
        args.push("-o".into());
        args.push(request.output_path().into_os_string());
        args.push(request.source.as_os_str().to_owned());
        args.extend(request.spec.sources.iter().map(|p| p.as_os_str().to_owned()));

        // Libraries go last so the linker sees them after the objects using them
        for lib in self.libraries.iter().chain(request.spec.libraries.iter()) {
            args.push(format!("-l{}", lib).into());
        }

        args
    }
}

impl BuildBackend for CompilerBackend {
    fn name(&self) -> &str {
        "compiler"
    }

    fn build(&self, request: &BuildRequest<'_>) -> KilnResult<PathBuf> {
        let compiler = self.compiler_for(request.source);
        let args = self.arguments(request);
        let command_line = format!(
            "{} {}",
            compiler,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        info!("Compiling {}", request.source.display());
        debug!("Executing: {}", command_line);

        let output = Command::new(compiler)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| KilnError::command_failed(&command_line, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(KilnError::BuildFailure {
                source_path: request.source.to_path_buf(),
                command: command_line,
                code: output.status.code(),
                output: build_error_output(&stdout, &stderr),
            });
        }

        let produced = request.output_path();
        if !produced.is_file() {
            return Err(KilnError::BuildFailure {
                source_path: request.source.to_path_buf(),
                command: command_line,
                code: output.status.code(),
                output: format!(
                    "compiler reported success but wrote no {}\n{}",
                    produced.display(),
                    build_error_output(&stdout, &stderr)
                ),
            });
        }

        Ok(produced)
    }
}
