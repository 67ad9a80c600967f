//! Toolchain fingerprints
//!
//! The fingerprint identifies the environment an artifact was compiled in.
//! It becomes part of the artifact file name, so a toolchain upgrade lands
//! builds at a new path instead of overwriting the old one.

use crate::config::schema::FingerprintConfig;
use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::env;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

/// Source of the environment fingerprint
pub trait FingerprintProvider: Send + Sync {
    /// Current fingerprint. The cache passes it through [`sanitize`] before
    /// using it in a file name.
    ///
    /// May change between calls; callers must not cache it.
    fn fingerprint(&self) -> KilnResult<String>;
}

/// A fingerprint fixed at construction time
#[derive(Debug, Clone)]
pub struct FixedFingerprint(String);

impl FixedFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl FingerprintProvider for FixedFingerprint {
    fn fingerprint(&self) -> KilnResult<String> {
        sanitize(&self.0)
    }
}

/// Fingerprint derived from the installed compiler toolchain
///
/// An override environment variable wins when set and non-empty. Otherwise
/// the configured version command is run once and the SHA256 of its output
/// is truncated to `length` hex characters.
pub struct ToolchainFingerprint {
    env_var: String,
    command: Vec<String>,
    length: usize,
    detected: OnceLock<String>,
}

impl ToolchainFingerprint {
    /// Create a provider from config
    pub fn from_config(config: &FingerprintConfig) -> Self {
        Self {
            env_var: config.env_var.clone(),
            command: config.command.clone(),
            length: config.length.clamp(4, 64),
            detected: OnceLock::new(),
        }
    }

    fn detect(&self) -> KilnResult<String> {
        if let Some(value) = self.detected.get() {
            return Ok(value.clone());
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| KilnError::Fingerprint("fingerprint.command is empty".to_string()))?;

        debug!("Probing toolchain: {}", self.command.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| KilnError::command_failed(self.command.join(" "), e))?;

        if !output.status.success() {
            return Err(KilnError::Fingerprint(format!(
                "`{}` exited with {}",
                self.command.join(" "),
                output.status
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(&output.stdout);
        hasher.update(&output.stderr);
        let digest = hex::encode(hasher.finalize());
        let value = digest[..self.length].to_string();

        Ok(self.detected.get_or_init(|| value).clone())
    }
}

impl FingerprintProvider for ToolchainFingerprint {
    fn fingerprint(&self) -> KilnResult<String> {
        if let Ok(value) = env::var(&self.env_var) {
            if !value.trim().is_empty() {
                return sanitize(&value);
            }
        }
        self.detect()
    }
}

/// Make a raw fingerprint safe to embed in a file name
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `-`.
pub fn sanitize(raw: &str) -> KilnResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(KilnError::Fingerprint("fingerprint is empty".to_string()));
    }

    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect())
}
