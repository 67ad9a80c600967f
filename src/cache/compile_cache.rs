//! The compile cache
//!
//! Resolves a native source to an up-to-date compiled library, building it
//! only when no valid artifact exists. Any number of threads or processes
//! may ask for the same source at once; the build lock makes sure only one
//! of them compiles while the rest wait for the artifact to appear.

use super::artifact::{
    append_record, artifact_state, link_for_load, publish, ArtifactPaths, ArtifactState,
    BuildRecord, STAGING_PREFIX,
};
use super::key::CacheKey;
use super::lock::{self, BuildLock, LockOptions, LockStatus};
use super::retry::RetryPolicy;
use crate::build::{BuildBackend, BuildRequest, CompilerBackend};
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::fingerprint::{self, FingerprintProvider, ToolchainFingerprint};
use crate::library::Library;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A compiled library ready on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Final artifact path
    pub path: PathBuf,
    /// Absolute source path
    pub source: PathBuf,
    /// Fingerprint the artifact was built under
    pub fingerprint: String,
    /// Checksum of the build inputs
    pub checksum: String,
    /// Whether this call ran the compiler
    pub rebuilt: bool,
}

/// Snapshot of one source's cache entry
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub lock_path: PathBuf,
    pub fingerprint: String,
    pub state: ArtifactState,
    pub lock: LockStatus,
}

/// Content- and toolchain-addressed build cache
#[derive(Clone)]
pub struct CompileCache {
    fingerprint: Arc<dyn FingerprintProvider>,
    backend: Arc<dyn BuildBackend>,
    lock: LockOptions,
    retry: RetryPolicy,
}

impl CompileCache {
    /// Create a cache over a fingerprint provider and a build backend
    pub fn new(
        fingerprint: impl FingerprintProvider + 'static,
        backend: impl BuildBackend + 'static,
    ) -> Self {
        Self {
            fingerprint: Arc::new(fingerprint),
            backend: Arc::new(backend),
            lock: LockOptions::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Cache using the system compiler and toolchain fingerprint from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ToolchainFingerprint::from_config(&config.fingerprint),
            CompilerBackend::from_config(&config.build),
        )
        .with_lock_options(LockOptions {
            attempt: Duration::from_millis(config.build.lock_attempt_ms),
            expiry: Duration::from_secs(config.build.lock_expiry_secs),
        })
        .with_retry_policy(RetryPolicy::from_config(&config.build))
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock = options;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Current fingerprint, as used for artifact names
    pub fn fingerprint(&self) -> KilnResult<String> {
        fingerprint::sanitize(&self.fingerprint.fingerprint()?)
    }

    /// Compute the key and on-disk paths for `source` right now
    pub fn key_for(&self, source: &Path) -> KilnResult<(CacheKey, ArtifactPaths)> {
        let source = resolve_source(source)?;
        let fingerprint = self.fingerprint()?;
        let key = CacheKey::compute(&source, &fingerprint)?;
        let paths = ArtifactPaths::for_key(&key);
        Ok((key, paths))
    }

    /// Make sure a valid artifact for `source` exists, building it if needed
    ///
    /// Waits at most `timeout` for another process's build before failing
    /// with `CompilationTimeout`. Build failures are returned immediately.
    pub fn ensure_built(&self, source: &Path, timeout: Duration) -> KilnResult<Artifact> {
        let (mut key, paths) = self.key_for(source)?;
        let pid = std::process::id();

        let started = Instant::now();
        let mut backoff = self.retry.backoff();
        let mut rebuilt = false;

        // Readers never take the lock; only a missing or stale artifact does.
        while artifact_state(&paths, &key) != ArtifactState::Valid {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(KilnError::CompilationTimeout {
                    lock_path: paths.lock.clone(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            match BuildLock::try_acquire(&paths.lock, &self.lock) {
                Ok(held) => {
                    // The source may have been edited while we waited
                    key = CacheKey::compute(&key.source, &key.fingerprint)?;
                    // Someone may have finished while we were acquiring
                    if artifact_state(&paths, &key) != ArtifactState::Valid {
                        let expiry = self.lock.expiry;
                        rebuilt |= while_refreshing(&held, expiry, || self.compile(&key, &paths))?;
                    }
                    drop(held);
                }
                Err(e) if e.is_retryable() => {
                    debug!("{}: could not obtain lock {}", pid, paths.lock.display());
                    let remaining = timeout.saturating_sub(started.elapsed());
                    thread::sleep(backoff.next_delay().min(remaining));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Artifact {
            path: paths.artifact,
            source: key.source,
            fingerprint: key.fingerprint,
            checksum: key.checksum,
            rebuilt,
        })
    }

    /// [`ensure_built`](Self::ensure_built), then load the artifact
    ///
    /// The library is opened through a hard link named after its checksum,
    /// so a rebuild loads fresh code even while an older handle is alive.
    ///
    /// # Safety
    ///
    /// Loading runs the compiled library's initializers; see [`Library::open`].
    pub unsafe fn ensure_loaded(&self, source: &Path, timeout: Duration) -> KilnResult<Library> {
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            let artifact = self.ensure_built(source, remaining)?;
            let paths = ArtifactPaths::new(&artifact.source, &artifact.fingerprint);

            if let Some(link) = link_for_load(&paths, &artifact.checksum)? {
                let library = Library::open(&link)?;
                debug!("{}: loaded {}", std::process::id(), link.display());
                return Ok(library);
            }
            debug!(
                "{}: {} was rebuilt before it could be loaded",
                std::process::id(),
                paths.artifact.display()
            );
        }
    }

    /// Inspect the cache entry for `source` without building anything
    pub fn status(&self, source: &Path) -> KilnResult<SourceStatus> {
        let (key, paths) = self.key_for(source)?;
        Ok(SourceStatus {
            state: artifact_state(&paths, &key),
            lock: lock::inspect(&paths.lock, self.lock.expiry)?,
            source: key.source,
            artifact: paths.artifact,
            lock_path: paths.lock,
            fingerprint: key.fingerprint,
        })
    }

    /// Build into a private staging dir and rename the result into place
    ///
    /// Returns false, publishing nothing, if the inputs changed while the
    /// compiler ran: the output matches neither the old key nor the new one.
    fn compile(&self, key: &CacheKey, paths: &ArtifactPaths) -> KilnResult<bool> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(paths.dir())
            .map_err(|e| {
                KilnError::io(
                    format!("creating staging directory in {}", paths.dir().display()),
                    e,
                )
            })?;

        let request = BuildRequest {
            source: &key.source,
            spec: &key.spec,
            staging_dir: staging.path(),
            output_name: paths.file_name()?,
        };

        let started = Instant::now();
        let produced = self.backend.build(&request)?;
        if !produced.starts_with(staging.path()) {
            return Err(KilnError::Internal(format!(
                "backend {} wrote {} outside its staging directory",
                self.backend.name(),
                produced.display()
            )));
        }

        let after = CacheKey::compute(&key.source, &key.fingerprint)?;
        if after.checksum != key.checksum {
            warn!(
                "{} changed during the build; discarding the result",
                key.source.display()
            );
            return Ok(false);
        }

        append_record(&produced, &BuildRecord::new(key, self.backend.name()))?;
        publish(&produced, paths)?;

        info!(
            "{}: built {} in {:.1}s",
            std::process::id(),
            paths.artifact.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(true)
    }
}

/// Run `build` while a helper thread keeps `held` from expiring
fn while_refreshing<T>(held: &BuildLock, expiry: Duration, build: impl FnOnce() -> T) -> T {
    let interval = (expiry / 3).max(Duration::from_millis(10));
    let (done, stop) = mpsc::channel::<()>();

    thread::scope(|scope| {
        scope.spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(interval) {
                if let Err(e) = held.refresh(expiry) {
                    warn!("Could not refresh lock {}: {}", held.path().display(), e);
                }
            }
        });
        let result = build();
        drop(done);
        result
    })
}

/// Absolute path of an existing source
fn resolve_source(source: &Path) -> KilnResult<PathBuf> {
    let absolute = std::path::absolute(source)
        .map_err(|e| KilnError::io(format!("resolving {}", source.display()), e))?;
    if !absolute.is_file() {
        return Err(KilnError::SourceNotFound(absolute));
    }
    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::artifact::read_record;
    use crate::fingerprint::FixedFingerprint;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use tempfile::TempDir;

    /// Backend that writes a fake library and counts invocations
    #[derive(Default)]
    struct CountingBackend {
        builds: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl BuildBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn build(&self, request: &BuildRequest<'_>) -> KilnResult<PathBuf> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let out = request.output_path();
            if self.fail {
                // Leave a partial file behind in staging, like a killed compiler
                fs::write(&out, b"\x7fELF half").unwrap();
                return Err(KilnError::BuildFailure {
                    source_path: request.source.to_path_buf(),
                    command: "fake-cc".to_string(),
                    code: Some(1),
                    output: "error: expected ';'".to_string(),
                });
            }
            thread::sleep(self.delay);
            let content = fs::read(request.source).unwrap();
            fs::write(&out, [b"\x7fELF".as_slice(), &content].concat()).unwrap();
            Ok(out)
        }
    }

    /// Backend that edits the source once, after reading what it compiles
    struct EditingBackend {
        builds: Arc<AtomicUsize>,
        edit: &'static str,
    }

    impl BuildBackend for EditingBackend {
        fn name(&self) -> &str {
            "editing"
        }

        fn build(&self, request: &BuildRequest<'_>) -> KilnResult<PathBuf> {
            let content = fs::read(request.source).unwrap();
            if self.builds.fetch_add(1, Ordering::SeqCst) == 0 {
                fs::write(request.source, self.edit).unwrap();
            }
            let out = request.output_path();
            fs::write(&out, [b"\x7fELF".as_slice(), &content].concat()).unwrap();
            Ok(out)
        }
    }

    /// Fingerprint that tests can change between calls
    struct SwitchableFingerprint(Arc<Mutex<String>>);

    impl FingerprintProvider for SwitchableFingerprint {
        fn fingerprint(&self) -> KilnResult<String> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn quick(cache: CompileCache) -> CompileCache {
        cache
            .with_lock_options(LockOptions {
                attempt: Duration::from_millis(50),
                expiry: Duration::from_secs(60),
            })
            .with_retry_policy(RetryPolicy {
                base: Duration::from_millis(20),
                max: Duration::from_millis(50),
            })
    }

    fn counting_cache(builds: &Arc<AtomicUsize>) -> CompileCache {
        quick(CompileCache::new(
            FixedFingerprint::new("sdk-1.0"),
            CountingBackend {
                builds: Arc::clone(builds),
                ..Default::default()
            },
        ))
    }

    fn source(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("add.cpp");
        fs::write(&path, content).unwrap();
        path
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn builds_once_then_reuses() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int add(int a,int b){return a+b;}");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let first = cache.ensure_built(&src, TIMEOUT).unwrap();
        let bytes = fs::read(&first.path).unwrap();
        let second = cache.ensure_built(&src, TIMEOUT).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(first.rebuilt);
        assert!(!second.rebuilt);
        assert_eq!(first.path, second.path);
        assert_eq!(fs::read(&second.path).unwrap(), bytes);
        assert!(first
            .path
            .to_string_lossy()
            .ends_with(&format!("add.cpp_sdk-1.0.{}", crate::cache::library_extension())));
    }

    #[test]
    fn content_change_rebuilds_once() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int add(int a,int b){return a+b;}");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let first = cache.ensure_built(&src, TIMEOUT).unwrap();
        fs::write(&src, "int add(int a,int b){return a+b;}\nint subtract(int a,int b){return a-b;}").unwrap();
        let second = cache.ensure_built(&src, TIMEOUT).unwrap();
        let third = cache.ensure_built(&src, TIMEOUT).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(first.path, second.path);
        assert_ne!(first.checksum, second.checksum);
        assert_eq!(read_record(&second.path).unwrap().checksum, second.checksum);
        assert!(!third.rebuilt);
    }

    #[test]
    fn fingerprint_change_builds_new_path() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let fp = Arc::new(Mutex::new("sdk-1.0".to_string()));
        let cache = quick(CompileCache::new(
            SwitchableFingerprint(Arc::clone(&fp)),
            CountingBackend {
                builds: Arc::clone(&builds),
                ..Default::default()
            },
        ));

        let old = cache.ensure_built(&src, TIMEOUT).unwrap();
        let old_bytes = fs::read(&old.path).unwrap();

        *fp.lock().unwrap() = "sdk-2.0".to_string();
        let new = cache.ensure_built(&src, TIMEOUT).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_ne!(old.path, new.path);
        assert_eq!(fs::read(&old.path).unwrap(), old_bytes);
        assert_eq!(read_record(&new.path).unwrap().fingerprint, "sdk-2.0");
    }

    #[test]
    fn concurrent_callers_build_once() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int add(int a,int b){return a+b;}");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = quick(CompileCache::new(
            FixedFingerprint::new("sdk-1.0"),
            CountingBackend {
                builds: Arc::clone(&builds),
                delay: Duration::from_millis(300),
                ..Default::default()
            },
        ));

        let callers = 16;
        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let cache = cache.clone();
                let src = src.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.ensure_built(&src, TIMEOUT)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| r.as_ref().unwrap().rebuilt).count(), 1);

        let (_, paths) = cache.key_for(&src).unwrap();
        assert!(!paths.lock.exists());
    }

    #[test]
    fn build_failure_is_terminal_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int add(");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = quick(CompileCache::new(
            FixedFingerprint::new("sdk-1.0"),
            CountingBackend {
                builds: Arc::clone(&builds),
                fail: true,
                ..Default::default()
            },
        ));

        let err = cache.ensure_built(&src, TIMEOUT).unwrap_err();
        assert!(matches!(err, KilnError::BuildFailure { .. }));
        assert!(err.to_string().contains("expected ';'"));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let (_, paths) = cache.key_for(&src).unwrap();
        assert!(!paths.artifact.exists());
        assert!(!paths.lock.exists());

        // Staging directory went away with the failed build
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["add.cpp".to_string()]);
    }

    #[test]
    fn lock_removed_after_success() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let artifact = cache.ensure_built(&src, TIMEOUT).unwrap();
        let (_, paths) = cache.key_for(&src).unwrap();

        assert!(artifact.path.exists());
        assert!(!paths.lock.exists());
    }

    #[test]
    fn held_lock_times_out_with_lock_path() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let (_, paths) = cache.key_for(&src).unwrap();
        let _held = BuildLock::try_acquire(&paths.lock, &LockOptions::default()).unwrap();

        let err = cache
            .ensure_built(&src, Duration::from_millis(300))
            .unwrap_err();

        assert!(matches!(err, KilnError::CompilationTimeout { .. }));
        assert!(err.to_string().contains(&*paths.lock.to_string_lossy()));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn partial_artifact_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let (key, paths) = cache.key_for(&src).unwrap();
        fs::write(&paths.artifact, b"\x7fELF trunc").unwrap();
        assert_eq!(artifact_state(&paths, &key), ArtifactState::Stale);

        let artifact = cache.ensure_built(&src, TIMEOUT).unwrap();

        assert!(artifact.rebuilt);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(artifact_state(&paths, &key), ArtifactState::Valid);
    }

    #[test]
    fn fingerprint_cannot_leave_source_dir() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = quick(CompileCache::new(
            SwitchableFingerprint(Arc::new(Mutex::new("v1/../x".to_string()))),
            CountingBackend {
                builds: Arc::clone(&builds),
                ..Default::default()
            },
        ));

        let artifact = cache.ensure_built(&src, TIMEOUT).unwrap();

        assert_eq!(artifact.fingerprint, "v1-..-x");
        assert_eq!(artifact.path.parent(), Some(dir.path()));
        assert_eq!(
            artifact.path.file_name().unwrap().to_string_lossy(),
            format!("add.cpp_v1-..-x.{}", crate::cache::library_extension())
        );
        assert_eq!(cache.fingerprint().unwrap(), "v1-..-x");
    }

    #[test]
    fn edit_while_waiting_is_what_gets_recorded() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let (_, paths) = cache.key_for(&src).unwrap();
        let held = BuildLock::try_acquire(&paths.lock, &LockOptions::default()).unwrap();
        let waiter = {
            let cache = cache.clone();
            let src = src.clone();
            thread::spawn(move || cache.ensure_built(&src, TIMEOUT))
        };

        // Waiter has computed its key from "int x;" by now
        thread::sleep(Duration::from_millis(200));
        fs::write(&src, "int y;").unwrap();
        drop(held);

        let artifact = waiter.join().unwrap().unwrap();
        let (current, _) = cache.key_for(&src).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(artifact.checksum, current.checksum);
        assert_eq!(read_record(&artifact.path).unwrap().checksum, current.checksum);
        assert_eq!(artifact_state(&paths, &current), ArtifactState::Valid);
        assert!(fs::read(&artifact.path).unwrap().starts_with(b"\x7fELFint y;"));
    }

    #[test]
    fn edit_during_build_is_rebuilt_not_recorded() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = quick(CompileCache::new(
            FixedFingerprint::new("sdk-1.0"),
            EditingBackend {
                builds: Arc::clone(&builds),
                edit: "int y;",
            },
        ));

        let artifact = cache.ensure_built(&src, TIMEOUT).unwrap();
        let current = CacheKey::compute(&src, "sdk-1.0").unwrap();

        // First output was built from "int x;" and thrown away
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(artifact.rebuilt);
        assert_eq!(artifact.checksum, current.checksum);
        assert_eq!(read_record(&artifact.path).unwrap().checksum, current.checksum);
        assert!(fs::read(&artifact.path).unwrap().starts_with(b"\x7fELFint y;"));
    }

    #[test]
    fn build_longer_than_lock_expiry_runs_once() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = CompileCache::new(
            FixedFingerprint::new("sdk-1.0"),
            CountingBackend {
                builds: Arc::clone(&builds),
                delay: Duration::from_millis(1500),
                ..Default::default()
            },
        )
        .with_lock_options(LockOptions {
            attempt: Duration::from_millis(50),
            expiry: Duration::from_millis(600),
        })
        .with_retry_policy(RetryPolicy {
            base: Duration::from_millis(20),
            max: Duration::from_millis(50),
        });

        let callers = 4;
        let barrier = Arc::new(Barrier::new(callers));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let cache = cache.clone();
                let src = src.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.ensure_built(&src, TIMEOUT)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_source_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let err = cache
            .ensure_built(&dir.path().join("nope.cpp"), TIMEOUT)
            .unwrap_err();

        assert!(matches!(err, KilnError::SourceNotFound(_)));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_tracks_state() {
        let dir = TempDir::new().unwrap();
        let src = source(&dir, "int x;");
        let builds = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(&builds);

        let before = cache.status(&src).unwrap();
        assert_eq!(before.state, ArtifactState::Missing);
        assert_eq!(before.lock, LockStatus::Free);
        assert_eq!(before.fingerprint, "sdk-1.0");

        cache.ensure_built(&src, TIMEOUT).unwrap();
        assert_eq!(cache.status(&src).unwrap().state, ArtifactState::Valid);

        fs::write(&src, "int y;").unwrap();
        assert_eq!(cache.status(&src).unwrap().state, ArtifactState::Stale);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
