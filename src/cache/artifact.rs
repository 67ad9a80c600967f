//! Artifact layout and build records
//!
//! An artifact lives next to its source at `{source}_{fingerprint}.{ext}`.
//! The build record is appended to the library file itself as a trailer:
//!
//! ```text
//! [ shared library bytes ][ record JSON ][ len: u64 LE ][ b"KILNREC1" ]
//! ```
//!
//! Dynamic loaders ignore bytes past the sections they map, and keeping the
//! record inside the file means one `rename` publishes both together.

use super::key::CacheKey;
use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const TRAILER_MAGIC: &[u8; 8] = b"KILNREC1";
const TRAILER_FOOTER_LEN: u64 = 16;
const MAX_RECORD_LEN: u64 = 64 * 1024;

/// Suffix appended to an artifact path to name its lock
pub const LOCK_SUFFIX: &str = ".lock";

/// Prefix of staging directories created next to artifacts
pub const STAGING_PREFIX: &str = ".kiln-build-";

/// Hex digits of the checksum used to name a load link
pub const LOAD_LINK_DIGITS: usize = 16;

/// Shared library extension for this platform
pub fn library_extension() -> &'static str {
    if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(windows) {
        "dll"
    } else {
        "so"
    }
}

/// Deterministic on-disk locations for one source/fingerprint pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// The compiled library
    pub artifact: PathBuf,
    /// Lock guarding builds of `artifact`
    pub lock: PathBuf,
}

impl ArtifactPaths {
    /// Locations for `source` built under `fingerprint`
    pub fn new(source: &Path, fingerprint: &str) -> Self {
        let mut name = source.as_os_str().to_owned();
        name.push(format!("_{}.{}", fingerprint, library_extension()));
        let artifact = PathBuf::from(name);

        let mut lock = artifact.clone().into_os_string();
        lock.push(LOCK_SUFFIX);

        Self {
            artifact,
            lock: PathBuf::from(lock),
        }
    }

    /// Locations for a cache key
    pub fn for_key(key: &CacheKey) -> Self {
        Self::new(&key.source, &key.fingerprint)
    }

    /// Bare file name of the artifact
    pub fn file_name(&self) -> KilnResult<&str> {
        self.artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KilnError::Internal(format!(
                "artifact path has no UTF-8 file name: {}",
                self.artifact.display()
            )))
    }

    /// Directory holding the artifact (and its staging dirs)
    pub fn dir(&self) -> &Path {
        self.artifact.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Metadata recorded with every build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Checksum of the build inputs
    pub checksum: String,
    /// Fingerprint the artifact was built under
    pub fingerprint: String,
    /// Source the artifact was built from
    pub source: PathBuf,
    /// Name of the backend that produced it
    pub backend: String,
    /// `host:pid` of the builder
    pub builder: String,
    /// When the build finished
    pub built_at: DateTime<Utc>,
}

impl BuildRecord {
    /// Record for a build of `key` by `backend`
    pub fn new(key: &CacheKey, backend: &str) -> Self {
        Self {
            checksum: key.checksum.clone(),
            fingerprint: key.fingerprint.clone(),
            source: key.source.clone(),
            backend: backend.to_string(),
            builder: super::lock::owner_id(),
            built_at: Utc::now(),
        }
    }

    /// Whether this record describes a build of `key`
    pub fn matches(&self, key: &CacheKey) -> bool {
        self.checksum == key.checksum && self.fingerprint == key.fingerprint
    }
}

/// Freshness of an artifact relative to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    /// No artifact at the expected path
    Missing,
    /// Artifact exists but was built from different inputs (or has no record)
    Stale,
    /// Artifact is a complete build of the current key
    Valid,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Stale => write!(f, "stale"),
            Self::Valid => write!(f, "valid"),
        }
    }
}

/// Inspect the artifact at `paths` against `key`
pub fn artifact_state(paths: &ArtifactPaths, key: &CacheKey) -> ArtifactState {
    if !paths.artifact.is_file() {
        return ArtifactState::Missing;
    }
    match read_record(&paths.artifact) {
        Some(record) if record.matches(key) => ArtifactState::Valid,
        _ => ArtifactState::Stale,
    }
}

/// Append `record` to the library at `path` and flush it to disk
pub fn append_record(path: &Path, record: &BuildRecord) -> KilnResult<()> {
    let payload = serde_json::to_vec(record)?;

    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| KilnError::io(format!("opening {} to record build", path.display()), e))?;

    file.write_all(&payload)
        .and_then(|_| file.write_all(&(payload.len() as u64).to_le_bytes()))
        .and_then(|_| file.write_all(TRAILER_MAGIC))
        .and_then(|_| file.sync_all())
        .map_err(|e| KilnError::io(format!("writing build record to {}", path.display()), e))
}

/// Read the build record trailer, if the file has a well-formed one
pub fn read_record(path: &Path) -> Option<BuildRecord> {
    let mut file = File::open(path).ok()?;
    let file_len = file.metadata().ok()?.len();
    if file_len < TRAILER_FOOTER_LEN {
        return None;
    }

    let mut footer = [0u8; TRAILER_FOOTER_LEN as usize];
    file.seek(SeekFrom::End(-(TRAILER_FOOTER_LEN as i64))).ok()?;
    file.read_exact(&mut footer).ok()?;
    if &footer[8..] != TRAILER_MAGIC {
        return None;
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&footer[..8]);
    let record_len = u64::from_le_bytes(len_bytes);
    if record_len == 0 || record_len > MAX_RECORD_LEN || record_len > file_len - TRAILER_FOOTER_LEN {
        return None;
    }

    let mut payload = vec![0u8; record_len as usize];
    file.seek(SeekFrom::End(-((TRAILER_FOOTER_LEN + record_len) as i64)))
        .ok()?;
    file.read_exact(&mut payload).ok()?;
    serde_json::from_slice(&payload).ok()
}

/// Move a finished build into place
///
/// `staged` must be on the same filesystem as `paths.artifact` so the
/// rename is atomic: readers see either the old file or the new one.
pub fn publish(staged: &Path, paths: &ArtifactPaths) -> KilnResult<()> {
    fs::rename(staged, &paths.artifact).map_err(|e| {
        KilnError::io(
            format!(
                "moving {} into place at {}",
                staged.display(),
                paths.artifact.display()
            ),
            e,
        )
    })
}

/// Name a build of `checksum` is loaded under: `{artifact}.{checksum:16}`
///
/// The dynamic loader returns the library it already has mapped when asked
/// for a path it has seen, so each build needs a path of its own.
pub fn load_link_path(artifact: &Path, checksum: &str) -> PathBuf {
    let digits = checksum.get(..LOAD_LINK_DIGITS).unwrap_or(checksum);
    let mut name = artifact.as_os_str().to_owned();
    name.push(format!(".{}", digits));
    PathBuf::from(name)
}

/// Artifact name a load link belongs to, if `name` looks like one
pub fn load_link_base<'a>(name: &'a str, artifact_suffix: &str) -> Option<&'a str> {
    let (base, digits) = name.rsplit_once('.')?;
    let is_digest = digits.len() == LOAD_LINK_DIGITS && digits.bytes().all(|b| b.is_ascii_hexdigit());
    (is_digest && base.ends_with(artifact_suffix)).then_some(base)
}

/// Hard-link the artifact to its load path for `checksum`
///
/// Returns `None` if the artifact no longer holds that build, i.e. another
/// process replaced it after the caller checked it.
pub fn link_for_load(paths: &ArtifactPaths, checksum: &str) -> KilnResult<Option<PathBuf>> {
    let link = load_link_path(&paths.artifact, checksum);
    match fs::hard_link(&paths.artifact, &link) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(KilnError::io(
                format!("linking {} to {}", paths.artifact.display(), link.display()),
                e,
            ))
        }
    }

    match read_record(&link) {
        Some(record) if record.checksum == checksum => Ok(Some(link)),
        _ => {
            let _ = fs::remove_file(&link);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::BuildSpec;
    use tempfile::TempDir;

    fn key(source: &Path, checksum: &str, fingerprint: &str) -> CacheKey {
        CacheKey {
            source: source.to_path_buf(),
            fingerprint: fingerprint.to_string(),
            checksum: checksum.to_string(),
            spec: BuildSpec::default(),
        }
    }

    #[test]
    fn paths_layout() {
        let paths = ArtifactPaths::new(Path::new("/ops/add.cpp"), "sdk-1.0");
        let ext = library_extension();

        assert_eq!(
            paths.artifact,
            PathBuf::from(format!("/ops/add.cpp_sdk-1.0.{}", ext))
        );
        assert_eq!(
            paths.lock,
            PathBuf::from(format!("/ops/add.cpp_sdk-1.0.{}.lock", ext))
        );
        assert_eq!(paths.dir(), Path::new("/ops"));
        assert_eq!(paths.file_name().unwrap(), format!("add.cpp_sdk-1.0.{}", ext));
    }

    #[test]
    fn record_roundtrip_through_trailer() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.so");
        fs::write(&lib, b"\x7fELF pretend library bytes").unwrap();

        let k = key(&dir.path().join("add.c"), "abc", "fp");
        let record = BuildRecord::new(&k, "test");
        append_record(&lib, &record).unwrap();

        assert_eq!(read_record(&lib), Some(record));
        assert!(fs::read(&lib).unwrap().starts_with(b"\x7fELF pretend"));
    }

    #[test]
    fn no_trailer_means_no_record() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.so");
        fs::write(&lib, b"half a library").unwrap();
        assert_eq!(read_record(&lib), None);

        fs::write(&lib, b"").unwrap();
        assert_eq!(read_record(&lib), None);
    }

    #[test]
    fn truncated_trailer_is_rejected() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.so");
        fs::write(&lib, b"bytes").unwrap();
        let k = key(&dir.path().join("add.c"), "abc", "fp");
        append_record(&lib, &BuildRecord::new(&k, "test")).unwrap();

        let bytes = fs::read(&lib).unwrap();
        fs::write(&lib, &bytes[..bytes.len() - 3]).unwrap();

        assert_eq!(read_record(&lib), None);
    }

    #[test]
    fn state_transitions() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("add.c");
        let k = key(&source, "abc", "fp");
        let paths = ArtifactPaths::for_key(&k);

        assert_eq!(artifact_state(&paths, &k), ArtifactState::Missing);

        fs::write(&paths.artifact, b"lib").unwrap();
        assert_eq!(artifact_state(&paths, &k), ArtifactState::Stale);

        append_record(&paths.artifact, &BuildRecord::new(&k, "test")).unwrap();
        assert_eq!(artifact_state(&paths, &k), ArtifactState::Valid);

        let edited = key(&source, "def", "fp");
        assert_eq!(artifact_state(&paths, &edited), ArtifactState::Stale);
    }

    #[test]
    fn load_link_follows_build() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("add.c");
        let first = key(&source, &"a".repeat(64), "fp");
        let paths = ArtifactPaths::for_key(&first);
        fs::write(&paths.artifact, b"first build").unwrap();
        append_record(&paths.artifact, &BuildRecord::new(&first, "test")).unwrap();

        let link = link_for_load(&paths, &first.checksum).unwrap().unwrap();
        assert_eq!(
            link,
            PathBuf::from(format!("{}.{}", paths.artifact.display(), "a".repeat(16)))
        );
        assert_eq!(fs::read(&link).unwrap(), fs::read(&paths.artifact).unwrap());
        // Asking again reuses the link
        assert_eq!(link_for_load(&paths, &first.checksum).unwrap(), Some(link.clone()));

        // A rebuild gets its own link and leaves the old one untouched
        let second = key(&source, &"b".repeat(64), "fp");
        let staged = dir.path().join("staged");
        fs::write(&staged, b"second build").unwrap();
        append_record(&staged, &BuildRecord::new(&second, "test")).unwrap();
        publish(&staged, &paths).unwrap();

        let next = link_for_load(&paths, &second.checksum).unwrap().unwrap();
        assert_ne!(next, link);
        assert!(fs::read(&next).unwrap().starts_with(b"second build"));
        assert!(fs::read(&link).unwrap().starts_with(b"first build"));
    }

    #[test]
    fn load_link_refused_for_replaced_artifact() {
        let dir = TempDir::new().unwrap();
        let k = key(&dir.path().join("add.c"), &"a".repeat(64), "fp");
        let paths = ArtifactPaths::for_key(&k);
        fs::write(&paths.artifact, b"lib").unwrap();
        append_record(&paths.artifact, &BuildRecord::new(&k, "test")).unwrap();

        assert_eq!(link_for_load(&paths, &"f".repeat(64)).unwrap(), None);
        assert!(!load_link_path(&paths.artifact, &"f".repeat(64)).exists());
    }

    #[test]
    fn load_link_names() {
        assert_eq!(
            load_link_base("add.c_fp.so.0123456789abcdef", ".so"),
            Some("add.c_fp.so")
        );
        assert_eq!(load_link_base("libz.so.1", ".so"), None);
        assert_eq!(load_link_base("add.c_fp.so.lock", ".so"), None);
        assert_eq!(load_link_base("notes.0123456789abcdef", ".so"), None);
    }

    #[test]
    fn state_display() {
        assert_eq!(ArtifactState::Valid.to_string(), "valid");
        assert_eq!(ArtifactState::Missing.to_string(), "missing");
    }
}
