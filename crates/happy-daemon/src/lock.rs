//! The daemon's advisory lock file (§3 "DaemonStateFile", §4.7 step 2, §9
//! "use an OS-level advisory lock file held open for the process's entire
//! lifetime").
//!
//! The lock file is distinct from the state file: the state file can be
//! rewritten by anyone holding the lock (heartbeat, shutdown) and is
//! tolerant to torn reads, while the lock file's only job is mutual
//! exclusion via an atomic create-exclusive open. Dropping the returned
//! [`DaemonLock`] releases it — callers must keep it alive for as long as
//! the daemon runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, DaemonResult};

/// An open file descriptor on the daemon lock file. The lock is released
/// (and the file removed) when this value is dropped.
pub struct DaemonLock {
    path: PathBuf,
    _file: File,
}

impl DaemonLock {
    /// Atomically create `path` with `O_EXCL`, writing this process's pid
    /// for debugging, and hold the descriptor open.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::LockFailed`] if the file already exists
    /// (another daemon holds it) or cannot be created.
    pub fn acquire(path: &Path) -> DaemonResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| DaemonError::LockFailed(e.to_string()))?;
        write!(file, "{}", std::process::id()).map_err(|e| DaemonError::LockFailed(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Release the lock explicitly (also happens implicitly on drop).
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let _first = DaemonLock::acquire(&path).unwrap();
        let second = DaemonLock::acquire(&path);
        assert!(second.is_err());
    }

    #[test]
    fn releasing_removes_the_file_so_a_new_daemon_can_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let lock = DaemonLock::acquire(&path).unwrap();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
        assert!(DaemonLock::acquire(&path).is_ok());
    }
}
