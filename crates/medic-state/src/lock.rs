//! Single-instance lock on a workload root
//!
//! The lock file holds one line: `<pid> <rfc3339 timestamp>`. Existence
//! alone does not block a new instance; the owner's liveness is re-checked
//! with signal 0, so a lock left behind by a crashed supervisor is
//! reclaimed instead of wedging the workload forever.

use chrono::Utc;
use medic_core::{MedicError, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Liveness-checked lock asserting single ownership of a workload root
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Acquire the lock at `path`, reclaiming it if the owner is dead
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let pid = std::process::id();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match parse_owner(&content) {
                Some(owner) if owner != pid && process_alive(owner) => {
                    return Err(MedicError::LockHeld(owner));
                }
                Some(owner) => {
                    info!("Reclaiming stale lock from dead process {}", owner);
                }
                None => {
                    warn!("Malformed lock file at {:?}, reclaiming", path);
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{} {}\n", pid, Utc::now().to_rfc3339()))?;
        info!("Acquired instance lock at {:?} (pid {})", path, pid);

        Ok(Self { path, pid })
    }

    /// PID recorded in the lock
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Only remove the lock if it is still ours.
        if let Ok(content) = std::fs::read_to_string(&self.path) {
            if parse_owner(&content) == Some(self.pid) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

fn parse_owner(content: &str) -> Option<u32> {
    content.split_whitespace().next()?.parse().ok()
}

/// Signal-0 liveness probe; a dead owner makes the lock stale
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if unsafe { libc::kill(pid as i32, 0) } == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to another user.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a liveness probe, treat any existing lock as active.
    true
}
