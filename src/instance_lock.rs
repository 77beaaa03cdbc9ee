//! Single instance lock using a Unix socket.
//!
//! Two reconcilers attached to the same store would race on every control
//! point, so only one process may run per runtime directory. The socket is
//! released by the OS when the process dies, so no stale lock file remains.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SOCKET_NAME: &str = "occupancy-reconciler.sock";

#[derive(Debug, Error)]
pub enum InstanceLockError {
    #[error("another instance is already running ({0})")]
    AlreadyRunning(PathBuf),

    #[error("failed to acquire instance lock: {0}")]
    Io(#[from] io::Error),
}

/// Held for the lifetime of the process. Dropping it removes the socket.
pub struct InstanceLock {
    _listener: UnixListener,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock in the user's runtime directory.
    pub fn acquire() -> Result<Self, InstanceLockError> {
        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
        Self::acquire_at(socket_path(runtime_dir.as_deref()))
    }

    pub fn acquire_at(path: PathBuf) -> Result<Self, InstanceLockError> {
        if path.exists() {
            // A socket nobody answers on was left by a killed process.
            if UnixStream::connect(&path).is_ok() {
                return Err(InstanceLockError::AlreadyRunning(path));
            }
            let _ = std::fs::remove_file(&path);
        }

        match UnixListener::bind(&path) {
            Ok(listener) => Ok(Self {
                _listener: listener,
                path,
            }),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                Err(InstanceLockError::AlreadyRunning(path))
            }
            Err(e) => Err(InstanceLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Socket location, falling back to `/tmp` without a runtime directory.
pub fn socket_path(runtime_dir: Option<&Path>) -> PathBuf {
    runtime_dir
        .unwrap_or_else(|| Path::new("/tmp"))
        .join(SOCKET_NAME)
}
