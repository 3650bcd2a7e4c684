//! Cross-process exclusion guarding access to a physical chip.
//!
//! A well-known path is opened (creating it if necessary) and advisory-locked
//! with `flock(2)`. The lock is exclusive, single-owner, and released
//! automatically by the kernel if the owning process dies, so there is no
//! stale-lock cleanup to do on startup.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub const DEFAULT_LOCK_PATH: &str = "/var/run/atsha.lock";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An acquired exclusive lock. Released (best-effort) when dropped.
pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        let deadline = Instant::now() + timeout;
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(ProcessLock { file });
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EWOULDBLOCK) {
                return Err(Error::Io(err));
            }
            if Instant::now() >= deadline {
                return Err(Error::LockTimeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquisition_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atsha.lock");
        let _first = ProcessLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let second = ProcessLock::acquire(&path, Duration::from_millis(100));
        assert!(matches!(second, Err(Error::LockTimeout)));
    }

    #[test]
    fn lock_is_reacquirable_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atsha.lock");
        {
            let _first = ProcessLock::acquire(&path, Duration::from_secs(1)).unwrap();
        }
        let second = ProcessLock::acquire(&path, Duration::from_secs(1));
        assert!(second.is_ok());
    }
}
