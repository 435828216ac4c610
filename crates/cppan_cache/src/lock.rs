use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use fs4::fs_std::FileExt;

use crate::CacheError;

/// An advisory, exclusive OS file lock.
///
/// Locks establish the only cross-process happens-before edges of the fetch
/// pipeline: two processes never unpack the same package simultaneously. A
/// failed [`FileLock::try_acquire`] is a cooperative "someone else is
/// building this" signal, not an error.
pub struct FileLock {
    file: std::fs::File,
    path: PathBuf,
}

impl FileLock {
    /// The lock file guarding `name` inside `locks_dir`.
    pub fn lock_path(locks_dir: &Path, name: &str) -> PathBuf {
        locks_dir.join(format!("{name}.lock"))
    }

    fn open(path: &Path) -> Result<std::fs::File, CacheError> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                CacheError::Lock(
                    format!("failed to open lock file '{}'", path.display()),
                    e,
                )
            })
    }

    /// Tries to take the lock without blocking. `Ok(None)` means another
    /// process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, CacheError> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(true) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Ok(false) => Ok(None),
            Err(e) => Err(CacheError::Lock(
                format!("failed to lock '{}'", path.display()),
                e,
            )),
        }
    }

    /// Takes the lock, blocking until the current holder releases it. The
    /// wait happens on the blocking pool; a warning is logged every 30
    /// seconds so a stuck peer process is visible.
    pub async fn acquire(path: &Path) -> Result<Self, CacheError> {
        let lock_path = path.to_path_buf();
        let acquire = tokio::task::spawn_blocking(move || {
            let file = Self::open(&lock_path)?;
            file.lock_exclusive().map_err(|e| {
                CacheError::Lock(
                    format!("failed to lock '{}'", lock_path.display()),
                    e,
                )
            })?;
            Ok(FileLock {
                file,
                path: lock_path,
            })
        });

        let warn_path = path.display().to_string();
        tokio::select!(
            lock = acquire => lock.unwrap_or_else(|e| {
                Err(CacheError::Lock(
                    format!("lock task for '{warn_path}' panicked"),
                    std::io::Error::other(e),
                ))
            }),
            _ = warn_blocked_forever(warn_path.clone()) => unreachable!("the warn future never finishes"),
        )
    }

    /// The lock file this lock holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

async fn warn_blocked_forever(path: String) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        tracing::warn!("blocked waiting for file lock '{path}'");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn try_acquire_reports_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = FileLock::lock_path(dir.path(), "pkg");

        let held = FileLock::try_acquire(&path).unwrap();
        assert!(held.is_some());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = FileLock::lock_path(dir.path(), "pkg");

        let held = FileLock::try_acquire(&path).unwrap().unwrap();
        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { FileLock::acquire(&path).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap().unwrap();
    }
}
