//! Build locks
//!
//! A lock is a file created with `O_EXCL` next to the artifact it guards.
//! Its body is a JSON [`LockInfo`] carrying a random token and an expiry.
//! Process liveness is never checked: a lock whose expiry has passed is
//! abandoned and any waiter may break it.
//!
//! Breaking renames the lock to a unique tombstone first, so two waiters
//! can't both delete it, then confirms the tombstone holds the token that
//! was judged stale. If it doesn't, a fresh lock was caught in between and
//! is linked back into place.

use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

/// Interval between `O_EXCL` attempts within one acquisition
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Random identity of this acquisition
    pub token: Uuid,
    /// Process that took the lock
    pub pid: u32,
    /// Host that took the lock
    pub host: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
    /// After this instant the lock is abandoned
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(expiry: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: Uuid::new_v4(),
            pid: std::process::id(),
            host: hostname(),
            acquired_at: now,
            expires_at: expiry_after(now, expiry),
        }
    }

    /// Whether the lock has outlived its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Timing for lock acquisition
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long one acquisition attempt keeps polling
    pub attempt: Duration,
    /// Lifetime written into new locks
    pub expiry: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            attempt: Duration::from_secs(1),
            expiry: Duration::from_secs(10 * 60),
        }
    }
}

/// What is currently at a lock path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock file
    Free,
    /// Live lock
    Held(LockInfo),
    /// Lock past its expiry (info absent when the body is unreadable)
    Expired(Option<LockInfo>),
}

/// RAII guard for a held build lock; dropping it deletes the lock file
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
    token: Uuid,
}

impl BuildLock {
    /// Try to take the lock at `path`, polling for at most `options.attempt`
    ///
    /// Returns `LockContention` if another holder keeps it for the whole
    /// attempt. Expired locks found along the way are broken.
    pub fn try_acquire(path: &Path, options: &LockOptions) -> KilnResult<Self> {
        let deadline = Instant::now() + options.attempt;

        loop {
            match Self::create(path, options.expiry) {
                Ok(lock) => return Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if break_if_expired(path, options.expiry)? {
                        continue;
                    }
                }
                Err(e) => {
                    return Err(KilnError::io(
                        format!("creating lock {}", path.display()),
                        e,
                    ))
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(KilnError::LockContention {
                    lock_path: path.to_path_buf(),
                });
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn create(path: &Path, expiry: Duration) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        let info = LockInfo::new(expiry);
        let body = serde_json::to_vec(&info).map_err(std::io::Error::other);
        let written = body.and_then(|b| {
            file.write_all(&b)?;
            file.sync_all()
        });

        if let Err(e) = written {
            let _ = fs::remove_file(path);
            return Err(e);
        }

        debug!("{}: acquired lock {}", std::process::id(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            token: info.token,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the lock's expiry to `expiry` from now, keeping its token
    ///
    /// Holders call this periodically while building so waiters never see
    /// a live lock as abandoned. Returns `LockContention` if the file no
    /// longer carries our token.
    pub fn refresh(&self, expiry: Duration) -> KilnResult<()> {
        let current = read_info(&self.path)
            .map_err(|e| KilnError::io(format!("reading lock {}", self.path.display()), e))?;
        let Some(mut info) = current.filter(|info| info.token == self.token) else {
            return Err(KilnError::LockContention {
                lock_path: self.path.clone(),
            });
        };
        info.expires_at = expiry_after(Utc::now(), expiry);

        // Replace by rename so readers never see a half-written body
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::Builder::new()
            .prefix(".kiln-lock-")
            .tempfile_in(dir)
            .map_err(|e| KilnError::io(format!("refreshing lock {}", self.path.display()), e))?;
        let body = serde_json::to_vec(&info)?;
        staged
            .write_all(&body)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| KilnError::io(format!("refreshing lock {}", self.path.display()), e))?;
        staged
            .persist(&self.path)
            .map_err(|e| KilnError::io(format!("refreshing lock {}", self.path.display()), e.error))?;

        debug!("{}: refreshed lock {}", std::process::id(), self.path.display());
        Ok(())
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        // Only delete the file if it is still ours; an expired lock may have
        // been broken and re-taken by someone else while we were building.
        match read_info(&self.path) {
            Ok(Some(info)) if info.token != self.token => {
                warn!(
                    "Lock {} was taken over by {}:{} before release",
                    self.path.display(),
                    info.host,
                    info.pid
                );
            }
            Ok(None) => {
                warn!("Lock {} was replaced before release", self.path.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            _ => {
                if let Err(e) = fs::remove_file(&self.path) {
                    if e.kind() != ErrorKind::NotFound {
                        warn!("Failed to remove lock {}: {}", self.path.display(), e);
                    }
                }
                debug!("{}: released lock {}", std::process::id(), self.path.display());
            }
        }
    }
}

/// Inspect the lock at `path` without touching it
pub fn inspect(path: &Path, expiry: Duration) -> KilnResult<LockStatus> {
    match read_info(path) {
        Ok(Some(info)) if info.is_expired() => Ok(LockStatus::Expired(Some(info))),
        Ok(Some(info)) => Ok(LockStatus::Held(info)),
        Ok(None) => {
            if modified_before(path, expiry) {
                Ok(LockStatus::Expired(None))
            } else {
                // Body not written yet; the creator is mid-acquire
                Ok(LockStatus::Held(LockInfo {
                    token: Uuid::nil(),
                    pid: 0,
                    host: String::new(),
                    acquired_at: Utc::now(),
                    expires_at: Utc::now(),
                }))
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LockStatus::Free),
        Err(e) => Err(KilnError::io(format!("reading lock {}", path.display()), e)),
    }
}

/// Break the lock at `path` if it has expired
///
/// Returns true when the caller should retry creating the lock right away
/// (lock broken, or already gone).
pub fn break_if_expired(path: &Path, expiry: Duration) -> KilnResult<bool> {
    let observed = match read_info(path) {
        Ok(Some(info)) if info.is_expired() => Some(info.token),
        Ok(Some(_)) => return Ok(false),
        Ok(None) if modified_before(path, expiry) => None,
        Ok(None) => return Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(KilnError::io(format!("reading lock {}", path.display()), e)),
    };

    let mut tombstone = path.as_os_str().to_owned();
    tombstone.push(format!(".{}.stale", Uuid::new_v4().simple()));
    let tombstone = PathBuf::from(tombstone);

    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(KilnError::io(
                format!("moving expired lock {} aside", path.display()),
                e,
            ))
        }
    }

    let captured = read_info(&tombstone).ok().flatten().map(|info| info.token);
    let broke_expected = captured == observed;

    if broke_expected {
        warn!("Broke expired lock {}", path.display());
    } else if let Err(e) = fs::hard_link(&tombstone, path) {
        warn!(
            "Moved a live lock aside at {} and could not restore it: {}",
            path.display(),
            e
        );
    }

    if let Err(e) = fs::remove_file(&tombstone) {
        warn!("Failed to remove {}: {}", tombstone.display(), e);
    }

    Ok(broke_expected)
}

fn expiry_after(now: DateTime<Utc>, expiry: Duration) -> DateTime<Utc> {
    let expiry = chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(expiry).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Read and parse a lock body; `Ok(None)` if it is empty or malformed
fn read_info(path: &Path) -> std::io::Result<Option<LockInfo>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes).ok())
}

fn modified_before(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed >= age)
}

/// `host:pid` identity of this process
pub fn owner_id() -> String {
    format!("{}:{}", hostname(), std::process::id())
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(not(unix))]
fn hostname() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}
