//! Cross-process exclusion for sync runs
//!
//! A cron-triggered sync and a manual one must never interleave their
//! reset/replay sequences. The lock is an advisory `flock` on a file in the
//! state directory, released when the guard is dropped (or the process dies).

use crate::core::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a second process waits for a running sync before giving up
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Held for the duration of one sync
#[derive(Debug)]
pub struct SyncLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl SyncLock {
    /// Acquires the lock, waiting up to `wait` for another holder to finish.
    ///
    /// # Errors
    ///
    /// - `Error::Busy` if the lock is still held after `wait`
    /// - `Error::Persistence` if the lock file cannot be created or locked
    pub async fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        crate::utils::ensure_parent(path)?;
        let deadline = Instant::now() + wait;
        let mut announced = false;

        loop {
            let attempt_path = path.to_path_buf();
            let attempt = tokio::task::spawn_blocking(move || try_lock(&attempt_path))
                .await
                .map_err(|e| Error::Internal(format!("Lock task failed: {e}")))??;

            match attempt {
                Some(lock) => {
                    return Ok(Self {
                        _lock: lock,
                        path: path.to_path_buf(),
                    });
                }
                None if Instant::now() >= deadline => {
                    warn!("Timed out waiting for sync lock {}", path.display());
                    return Err(Error::Busy(path.to_path_buf()));
                }
                None => {
                    if !announced {
                        info!("Another sync is running, waiting...");
                        announced = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_lock(path: &Path) -> Result<Option<Flock<File>>> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(Some(lock)),
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
        Err((_, errno)) => Err(Error::Persistence(std::io::Error::from(errno))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_holder_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.lock");

        let first = SyncLock::acquire(&path, Duration::ZERO).await.unwrap();
        let second = SyncLock::acquire(&path, Duration::from_millis(300)).await;
        assert!(matches!(second, Err(Error::Busy(_))));

        drop(first);
        assert!(SyncLock::acquire(&path, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.lock");

        let first = SyncLock::acquire(&path, Duration::ZERO).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(first);
        });

        let second = SyncLock::acquire(&path, Duration::from_secs(5)).await;
        release.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiting_does_not_stall_single_threaded_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.lock");

        let first = SyncLock::acquire(&path, Duration::ZERO).await.unwrap();
        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { SyncLock::acquire(&path, Duration::from_secs(5)).await })
        };

        // The holder's task must still get scheduled while the waiter polls
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!waiter.is_finished());
        drop(first);

        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_unopenable_lock_path_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for writing as a lock file
        let result = SyncLock::acquire(dir.path(), Duration::ZERO).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
    }
}
