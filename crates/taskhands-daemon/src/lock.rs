//! Single-instance guard.
//!
//! The lock is a file holding the owner's PID. A file left behind by a dead
//! process is treated as stale and replaced.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DaemonError;

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    held: bool,
}

impl InstanceLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            held: false,
        }
    }

    /// Lock file that guards the store at `store_path`.
    pub fn for_store(store_path: &Path) -> Self {
        let mut name = store_path.as_os_str().to_os_string();
        name.push(".lock");
        Self::new(PathBuf::from(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    fn lock_error(&self, reason: impl std::fmt::Display) -> DaemonError {
        DaemonError::LockFile {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// PID recorded in the lock file, if any.
    pub fn owner(&self) -> Result<Option<u32>, DaemonError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => contents
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|e| self.lock_error(format!("invalid PID: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.lock_error(e)),
        }
    }

    #[cfg(unix)]
    pub fn is_process_running(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        kill(Pid::from_raw(raw), None).is_ok()
    }

    #[cfg(not(unix))]
    pub fn is_process_running(_pid: u32) -> bool {
        true
    }

    /// Take the lock for this process.
    pub fn acquire(&mut self) -> Result<(), DaemonError> {
        self.acquire_as(std::process::id())
    }

    fn acquire_as(&mut self, pid: u32) -> Result<(), DaemonError> {
        if let Some(owner) = self.owner()? {
            if owner != pid && Self::is_process_running(owner) {
                return Err(DaemonError::AlreadyRunning {
                    path: self.path.clone(),
                    pid: owner,
                });
            }
            if owner != pid {
                warn!("Replacing stale lock (PID {} not running): {}", owner, self.path.display());
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.lock_error(e))?;
            }
        }
        fs::write(&self.path, pid.to_string()).map_err(|e| self.lock_error(e))?;

        self.held = true;
        info!("Instance lock acquired: {} (PID: {})", self.path.display(), pid);
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), DaemonError> {
        if !self.held {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.lock_error(e)),
        }
        self.held = false;
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release instance lock: {}", e);
        }
    }
}
