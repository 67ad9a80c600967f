//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// kiln - build cache for native extensions
///
/// Compiles C and C++ sources into shared libraries once per content and
/// toolchain, safely across concurrent processes.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (and load) sources, reusing cached artifacts
    Build(BuildArgs),

    /// Show the cache state of sources
    Status(StatusArgs),

    /// Print the current toolchain fingerprint
    Fingerprint,

    /// Remove stale artifacts, expired locks and abandoned staging dirs
    Clean(CleanArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Source files or directories to discover sources in (defaults to current directory)
    pub paths: Vec<PathBuf>,

    /// Only build, don't load the artifacts
    #[arg(long)]
    pub no_load: bool,

    /// Concurrent builds (default: from config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Seconds to wait for another process's build (default: from config)
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Source files or directories (defaults to current directory)
    pub paths: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the clean command
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Directory to clean (defaults to current directory)
    pub dir: Option<PathBuf>,

    /// Dry run - show what would be removed
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.cxx)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .kiln.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Output format for status command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
