//! Finding and removing cache leftovers
//!
//! Artifacts are never deleted by the cache itself: a fingerprint change
//! leaves the old build where it was. This module finds what is safe to
//! reclaim under a directory tree.

use super::artifact::{library_extension, load_link_base, read_record, LOCK_SUFFIX, STAGING_PREFIX};
use super::lock::{self, LockStatus};
use crate::error::{KilnError, KilnResult};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Something kiln left behind that can be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leftover {
    /// Artifact built under a different fingerprint
    OtherFingerprint { path: PathBuf, fingerprint: String },
    /// Artifact whose source no longer exists
    SourceMissing { path: PathBuf, source: PathBuf },
    /// Load link for a build the artifact no longer holds
    OldLoadLink { path: PathBuf },
    /// Lock past its expiry, or a tombstone from breaking one
    ExpiredLock { path: PathBuf },
    /// Staging directory from a build that never finished
    StagingDir { path: PathBuf },
}

impl Leftover {
    pub fn path(&self) -> &Path {
        match self {
            Self::OtherFingerprint { path, .. }
            | Self::SourceMissing { path, .. }
            | Self::OldLoadLink { path }
            | Self::ExpiredLock { path }
            | Self::StagingDir { path } => path,
        }
    }

    /// Delete the leftover from disk
    pub fn remove(&self) -> KilnResult<()> {
        let path = self.path();
        let result = match self {
            Self::StagingDir { .. } => fs::remove_dir_all(path),
            _ => fs::remove_file(path),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KilnError::io(format!("removing {}", path.display()), e)),
        }
    }
}

impl fmt::Display for Leftover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OtherFingerprint { fingerprint, .. } => {
                write!(f, "artifact for fingerprint {}", fingerprint)
            }
            Self::SourceMissing { .. } => write!(f, "artifact without source"),
            Self::OldLoadLink { .. } => write!(f, "load link for an old build"),
            Self::ExpiredLock { .. } => write!(f, "expired lock"),
            Self::StagingDir { .. } => write!(f, "abandoned staging dir"),
        }
    }
}

/// Collect leftovers under `root`
///
/// `fingerprint` is the current one; artifacts built under it with an
/// existing source are kept, as is the load link of each one's current
/// build. Locks and staging dirs younger than `expiry`
/// are assumed to belong to running builds and are kept too.
pub fn find_leftovers(root: &Path, fingerprint: &str, expiry: Duration) -> KilnResult<Vec<Leftover>> {
    let mut found = Vec::new();
    scan(root, fingerprint, expiry, &mut found)?;
    found.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(found)
}

fn scan(dir: &Path, fingerprint: &str, expiry: Duration, found: &mut Vec<Leftover>) -> KilnResult<()> {
    let entries = fs::read_dir(dir)
        .map_err(|e| KilnError::io(format!("reading directory {}", dir.display()), e))?;

    let artifact_suffix = format!(".{}", library_extension());
    let lock_suffix = format!("{}{}", artifact_suffix, LOCK_SUFFIX);

    for entry in entries {
        let entry = entry.map_err(|e| KilnError::io("reading directory entry", e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry
            .file_type()
            .map_err(|e| KilnError::io(format!("inspecting {}", path.display()), e))?
            .is_dir();

        if is_dir {
            if name.starts_with(STAGING_PREFIX) {
                if older_than(&path, expiry) {
                    found.push(Leftover::StagingDir { path });
                }
            } else {
                scan(&path, fingerprint, expiry, found)?;
            }
            continue;
        }

        if name.ends_with(&artifact_suffix) {
            // Only files carrying a kiln build record are ours to judge
            let Some(record) = read_record(&path) else {
                continue;
            };
            if record.fingerprint != fingerprint {
                found.push(Leftover::OtherFingerprint {
                    path,
                    fingerprint: record.fingerprint,
                });
            } else if !record.source.exists() {
                found.push(Leftover::SourceMissing {
                    path,
                    source: record.source,
                });
            }
        } else if let Some(base) = load_link_base(&name, &artifact_suffix) {
            let Some(record) = read_record(&path) else {
                continue;
            };
            let current = read_record(&dir.join(base)).is_some_and(|base_record| {
                base_record.checksum == record.checksum
                    && base_record.fingerprint == fingerprint
                    && base_record.source.exists()
            });
            if !current {
                found.push(Leftover::OldLoadLink { path });
            }
        } else if name.ends_with(&lock_suffix) {
            if let LockStatus::Expired(_) = lock::inspect(&path, expiry)? {
                found.push(Leftover::ExpiredLock { path });
            }
        } else if name.contains(&lock_suffix) && name.ends_with(".stale") && older_than(&path, expiry) {
            found.push(Leftover::ExpiredLock { path });
        } else {
            debug!("Ignoring {}", path.display());
        }
    }

    Ok(())
}

fn older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed >= age)
}
