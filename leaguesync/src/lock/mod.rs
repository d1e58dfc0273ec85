//! Single-writer run lock.
//!
//! The pipeline takes a filesystem sentinel before touching any managed
//! state. Acquisition is fail-fast: if another live run holds the lock,
//! the caller gets [`LockError::Contention`] immediately and must not do
//! any work. Sentinels left behind by dead processes are detected by
//! age, and on the same host by probing the recorded pid, then archived
//! next to the lock rather than deleted.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::backup_stamp;

/// Identity of the process holding (or last holding) the run lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Holder process id.
    pub pid: u32,
    /// Host the holder ran on.
    pub hostname: String,
    /// The run the holder was executing.
    pub run_id: String,
    /// When the holder acquired the lock.
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    /// Describes the current process as a lock holder.
    #[must_use]
    pub fn current(run_id: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname(),
            run_id: run_id.into(),
            acquired_at: Utc::now(),
        }
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid {} on {} (run {}, since {})",
            self.pid, self.hostname, self.run_id, self.acquired_at
        )
    }
}

/// Errors raised while acquiring or releasing the run lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live run holds the lock.
    #[error("Run lock at '{path}' is held by {holder}")]
    Contention {
        /// The sentinel path.
        path: PathBuf,
        /// Who holds the lock.
        holder: LockHolder,
    },

    /// Reading, writing, or archiving the sentinel failed.
    #[error("Run lock I/O failed at '{path}': {source}")]
    Io {
        /// The sentinel path.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
}

/// Filesystem-based single-writer lock.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    stale_after: Duration,
}

impl RunLock {
    /// Creates a lock over the given sentinel path.
    ///
    /// A sentinel older than `stale_after` is treated as abandoned.
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    /// The sentinel path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts to take the lock for the given run.
    ///
    /// Returns [`LockError::Contention`] without blocking when another
    /// live run holds it. Stale sentinels are archived and acquisition
    /// proceeds.
    pub fn acquire(&self, run_id: &str) -> Result<RunLockGuard, LockError> {
        for _ in 0..3 {
            match self.read_holder()? {
                Some(holder) if self.is_stale(&holder) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        %holder,
                        "archiving stale run lock"
                    );
                    self.archive()?;
                }
                Some(holder) => {
                    return Err(LockError::Contention {
                        path: self.path.clone(),
                        holder,
                    });
                }
                None => {}
            }
            match self.try_create(run_id) {
                Ok(guard) => return Ok(guard),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
        Err(LockError::Io {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::WouldBlock, "lock acquisition raced"),
        })
    }

    fn read_holder(&self) -> Result<Option<LockHolder>, LockError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LockError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        match serde_json::from_str(&contents) {
            Ok(holder) => Ok(Some(holder)),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "archiving unreadable run lock sentinel"
                );
                self.archive()?;
                Ok(None)
            }
        }
    }

    fn is_stale(&self, holder: &LockHolder) -> bool {
        let age = Utc::now()
            .signed_duration_since(holder.acquired_at)
            .to_std()
            .unwrap_or_default();
        if age > self.stale_after {
            return true;
        }
        holder.hostname == hostname() && !process_alive(holder.pid)
    }

    fn archive(&self) -> Result<(), LockError> {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "lock".to_string(), |n| n.to_string_lossy().into_owned());
        let target = self
            .path
            .with_file_name(format!("{name}.stale.{}", backup_stamp(&Utc::now())));
        match fs::rename(&self.path, &target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn try_create(&self, run_id: &str) -> io::Result<RunLockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let holder = LockHolder::current(run_id);
        let payload = serde_json::to_string_pretty(&holder).map_err(io::Error::from)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(payload.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        tracing::debug!(path = %self.path.display(), pid = holder.pid, "acquired run lock");
        Ok(RunLockGuard {
            path: self.path.clone(),
            released: false,
        })
    }
}

/// Holds the run lock; dropping it releases the sentinel.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    released: bool,
}

impl RunLockGuard {
    /// Releases the lock, reporting any removal failure.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to release run lock"
                );
            }
        }
    }
}

fn hostname() -> String {
    if let Ok(name) = fs::read_to_string("/etc/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_in(dir: &tempfile::TempDir, stale_after: Duration) -> RunLock {
        RunLock::new(dir.path().join("leaguesync.lock"), stale_after)
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_secs(1800));

        let guard = lock.acquire("run-1").unwrap();
        assert!(lock.path().exists());
        guard.release().unwrap();
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_contention_is_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_secs(1800));

        let _guard = lock.acquire("run-1").unwrap();
        let err = lock.acquire("run-2").unwrap_err();
        match err {
            LockError::Contention { holder, .. } => {
                assert_eq!(holder.run_id, "run-1");
                assert_eq!(holder.pid, std::process::id());
            }
            other => panic!("expected contention, got {other}"),
        }
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_secs(1800));
        {
            let _guard = lock.acquire("run-1").unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
        lock.acquire("run-2").unwrap().release().unwrap();
    }

    #[test]
    fn test_stale_by_age_is_archived_and_taken() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_millis(0));
        let mut holder = LockHolder::current("run-dead");
        holder.pid = u32::MAX;
        holder.acquired_at = Utc::now() - chrono::Duration::hours(2);
        fs::write(lock.path(), serde_json::to_string(&holder).unwrap()).unwrap();

        let guard = lock.acquire("run-2").unwrap();
        let archived = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".stale."))
            .count();
        assert_eq!(archived, 1);
        guard.release().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dead_pid_on_same_host_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_secs(86_400));
        let mut holder = LockHolder::current("run-dead");
        holder.pid = u32::MAX;
        fs::write(lock.path(), serde_json::to_string(&holder).unwrap()).unwrap();

        lock.acquire("run-2").unwrap().release().unwrap();
    }

    #[test]
    fn test_unreadable_sentinel_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir, Duration::from_secs(1800));
        fs::write(lock.path(), "not a sentinel").unwrap();

        let guard = lock.acquire("run-1").unwrap();
        guard.release().unwrap();
    }
}
