//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Cache errors
    #[error("Source file does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("Build lock is held by another process: {lock_path}")]
    LockContention { lock_path: PathBuf },

    #[error(
        "Could not compile binary: lock already taken and timed out after {waited_secs}s. \
         If no build is running, delete the lock file: {lock_path}"
    )]
    CompilationTimeout { lock_path: PathBuf, waited_secs: u64 },

    #[error("Build failed for {source_path} (command: {command}, exit code: {code:?}):\n{output}")]
    BuildFailure {
        source_path: PathBuf,
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Invalid build directive in {path} line {line}: {reason}")]
    Directive {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    // Loader errors
    #[error("Failed to load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("Symbol {symbol} not found in {path}: {reason}")]
    SymbolNotFound {
        symbol: String,
        path: PathBuf,
        reason: String,
    },

    // Environment errors
    #[error("Could not determine toolchain fingerprint: {0}")]
    Fingerprint(String),

    #[error("Unsupported platform: {0}. kiln loads libraries on unix targets only.")]
    UnsupportedPlatform(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CompilationTimeout { .. } => {
                Some("Check the lock owner with: kiln status")
            }
            Self::BuildFailure { .. } => Some("Fix the compiler errors above and re-run"),
            Self::Fingerprint(_) => {
                Some("Set KILN_FINGERPRINT or configure fingerprint.command")
            }
            Self::SourceNotFound(_) => Some("Paths are resolved against the current directory"),
            _ => None,
        }
    }
}
