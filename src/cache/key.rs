//! Cache keys for native sources
//!
//! A key combines the source's location, the toolchain fingerprint, and a
//! SHA256 checksum over the source plus every file its directives pull in.
//! Same inputs = same key = no rebuild.

use crate::build::BuildSpec;
use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Absolute path of the main source
    pub source: PathBuf,
    /// Sanitized toolchain fingerprint
    pub fingerprint: String,
    /// Hex SHA256 over the build inputs
    pub checksum: String,
    /// Directives parsed from the source
    pub spec: BuildSpec,
}

impl CacheKey {
    /// Compute the key for `source` under `fingerprint`
    ///
    /// `source` must already be absolute; the caller has checked it exists.
    pub fn compute(source: &Path, fingerprint: &str) -> KilnResult<Self> {
        let content = read_source(source)?;
        let text = String::from_utf8_lossy(&content);
        let spec = BuildSpec::parse(source, &text)?;

        let mut hasher = Sha256::new();
        feed(&mut hasher, source, &content);
        for input in spec.inputs() {
            let bytes = read_source(input)?;
            feed(&mut hasher, input, &bytes);
        }
        let checksum = hex::encode(hasher.finalize());

        debug!("Checksum for {}: {}", source.display(), &checksum[..12]);

        Ok(Self {
            source: source.to_path_buf(),
            fingerprint: fingerprint.to_string(),
            checksum,
            spec,
        })
    }
}

/// Hash one input, framed by its path and length so inputs can't run together
fn feed(hasher: &mut Sha256, path: &Path, content: &[u8]) {
    let name = path.to_string_lossy();
    hasher.update((name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content);
}

fn read_source(path: &Path) -> KilnResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KilnError::SourceNotFound(path.to_path_buf())
        } else {
            KilnError::io(format!("reading source {}", path.display()), e)
        }
    })
}
