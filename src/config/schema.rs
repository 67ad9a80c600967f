//! Configuration schema for kiln
//!
//! Configuration is stored at `~/.config/kiln/config.toml`, optionally
//! overlaid by a project-local `.kiln.toml`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Compiler and cache settings
    pub build: BuildConfig,

    /// Toolchain fingerprint settings
    pub fingerprint: FingerprintConfig,

    /// Source discovery settings
    pub discover: DiscoverConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Compiler and cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// C compiler
    pub cc: String,

    /// C++ compiler
    pub cxx: String,

    /// Flags passed to every compile
    pub flags: Vec<String>,

    /// Libraries linked into every artifact
    pub libraries: Vec<String>,

    /// Give up waiting for an artifact after this many seconds
    pub timeout_secs: u64,

    /// How long a single lock acquisition attempt polls
    pub lock_attempt_ms: u64,

    /// First sleep between failed lock attempts
    pub retry_delay_ms: u64,

    /// Upper bound for the backoff between lock attempts
    pub max_retry_delay_ms: u64,

    /// A lock older than this is considered abandoned
    pub lock_expiry_secs: u64,

    /// Concurrent builds for `kiln build`
    pub jobs: usize,
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cc: "cc".to_string(),
            cxx: "c++".to_string(),
            flags: vec!["-O2".to_string()],
            libraries: vec![],
            timeout_secs: 5 * 60,
            lock_attempt_ms: 1000,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 1000,
            lock_expiry_secs: 10 * 60,
            jobs: 4,
        }
    }
}

/// Toolchain fingerprint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Environment variable that overrides the detected fingerprint
    pub env_var: String,

    /// Command whose output identifies the toolchain
    pub command: Vec<String>,

    /// Number of hex characters kept from the hash
    pub length: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            env_var: "KILN_FINGERPRINT".to_string(),
            command: vec!["c++".to_string(), "--version".to_string()],
            length: 10,
        }
    }
}

/// Source discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverConfig {
    /// File extensions eligible for discovery (without the dot)
    pub extensions: Vec<String>,

    /// Word that must appear in a `//` comment on the first line
    pub marker: String,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            extensions: vec![
                "cpp".to_string(),
                "cc".to_string(),
                "cxx".to_string(),
                "c".to_string(),
            ],
            marker: "kiln".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[fingerprint]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.timeout_secs, 300);
        assert_eq!(config.fingerprint.env_var, "KILN_FINGERPRINT");
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [build]
            cxx = "clang++"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.build.cxx, "clang++");
        assert_eq!(config.build.cc, "cc"); // default preserved
        assert_eq!(config.discover.marker, "kiln");
    }
}
