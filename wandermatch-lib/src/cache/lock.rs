use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Exclusive advisory lock on a cache's lock file.
///
/// Held while a process checks, recomputes and writes the cache, so two
/// processes embedding the same pool take turns. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Block until the lock at `path` is acquired.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::Persistence(format!("failed to open lock {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            retry_interrupted(|| {
                // SAFETY: the descriptor is owned by `file` and stays open for the call.
                if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            })
            .map_err(|e| Error::Persistence(format!("failed to lock {}: {e}", path.display())))?;
        }

        debug!(lock = %path.display(), "acquired cache lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            // SAFETY: the descriptor is still owned by `self.file`.
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
        debug!(lock = %self.path.display(), "released cache lock");
    }
}

/// Repeat a blocking call that a signal interrupted.
#[cfg_attr(not(unix), allow(dead_code))]
fn retry_interrupted(mut call: impl FnMut() -> std::io::Result<()>) -> std::io::Result<()> {
    loop {
        match call() {
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_lock_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.lock");

        let lock = CacheLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.lock");

        drop(CacheLock::acquire(&path).unwrap());
        CacheLock::acquire(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_second_holder_waits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.lock");

        let first = CacheLock::acquire(&path).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                // separate open file description, so flock contends with `first`
                let _second = CacheLock::acquire(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupted_lock_call_is_retried() {
        let mut calls = 0;
        let result = retry_interrupted(|| {
            calls += 1;
            if calls < 3 {
                Err(std::io::ErrorKind::Interrupted.into())
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_other_lock_errors_are_not_retried() {
        let mut calls = 0;
        let result = retry_interrupted(|| {
            calls += 1;
            Err(std::io::ErrorKind::PermissionDenied.into())
        });

        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::PermissionDenied);
        assert_eq!(calls, 1);
    }
}
