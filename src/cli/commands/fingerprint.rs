//! Fingerprint command - print the toolchain fingerprint

use crate::config::Config;
use crate::error::KilnResult;
use crate::fingerprint::{FingerprintProvider, ToolchainFingerprint};

/// Execute the fingerprint command
pub async fn execute(config: &Config) -> KilnResult<()> {
    let provider = ToolchainFingerprint::from_config(&config.fingerprint);
    let fingerprint = tokio::task::spawn_blocking(move || provider.fingerprint())
        .await
        .map_err(|e| crate::error::KilnError::Internal(format!("fingerprint task failed: {}", e)))??;
    println!("{}", fingerprint);
    Ok(())
}
