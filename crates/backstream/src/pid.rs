//! Single-instance locking through a PID file

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// PID file errors
#[derive(Debug, Error)]
pub enum PidError {
    /// Another live process holds the lock
    #[error("another instance is already running with pid {0}")]
    AlreadyRunning(u32),

    /// The file names a process other than this one
    #[error("pid file {0} is not owned by this process")]
    NotOwned(PathBuf),

    /// IO error
    #[error("pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A held PID file lock
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidFile {
    /// Take the lock at `path`.
    ///
    /// A file naming a live process fails with [`PidError::AlreadyRunning`];
    /// a stale or unreadable file is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, PidError> {
        let path = path.into();
        let pid = std::process::id();
        let io_error = |source| PidError::Io {
            path: path.clone(),
            source,
        };

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                write!(file, "{}", pid).map_err(io_error)?;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if let Some(existing) = read_pid(&path) {
                    if process_alive(existing) {
                        return Err(PidError::AlreadyRunning(existing));
                    }
                }
                warn!(path = %path.display(), "pid file exists but points to a process that is not running");
                fs::write(&path, pid.to_string()).map_err(io_error)?;
            }
            Err(e) => return Err(io_error(e)),
        }

        debug!(path = %path.display(), pid, "pid file acquired");
        Ok(Self {
            path,
            pid,
            released: false,
        })
    }

    /// Remove the file if it still names this process
    pub fn release(mut self) -> Result<(), PidError> {
        self.released = true;
        self.remove()
    }

    fn remove(&self) -> Result<(), PidError> {
        if read_pid(&self.path) != Some(self.pid) {
            return Err(PidError::NotOwned(self.path.clone()));
        }
        fs::remove_file(&self.path).map_err(|source| PidError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "pid file released");
        Ok(())
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove() {
                warn!(error = %e, "failed to release pid file");
            }
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks for existence and permission.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backstream.pid");

        let lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));

        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backstream.pid");

        let _lock = PidFile::acquire(&path).unwrap();
        match PidFile::acquire(&path) {
            Err(PidError::AlreadyRunning(pid)) => assert_eq!(pid, std::process::id()),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backstream.pid");
        fs::write(&path, i32::MAX.to_string()).unwrap();

        let lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_garbage_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backstream.pid");
        fs::write(&path, "not a pid").unwrap();

        let _lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_release_refuses_foreign_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("backstream.pid");

        let lock = PidFile::acquire(&path).unwrap();
        fs::write(&path, "1").unwrap();
        assert!(matches!(lock.release(), Err(PidError::NotOwned(_))));
        assert!(path.exists());
    }
}
