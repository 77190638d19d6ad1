//! Exclusive ownership of a snapshot file
//!
//! A running engine keeps the whole store in memory and rewrites its snapshot
//! on every tick, so a second writer's changes would be overwritten. Whoever
//! writes a snapshot holds `<snapshot>.lock` for as long as it does; the file
//! records the owner's process id so a lock left by a crashed process can be
//! taken over.

use crate::queue::error::{StoreError, StoreResult};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Held lock on one snapshot file; released on drop
#[derive(Debug)]
pub struct SnapshotLock {
    path: PathBuf,
}

impl SnapshotLock {
    pub fn path_for(snapshot: &Path) -> PathBuf {
        let mut name = snapshot.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock for `snapshot`
    ///
    /// Fails with [`StoreError::Locked`] while a live process owns it. A lock
    /// whose owner is gone is removed and taken over.
    pub fn acquire(snapshot: &Path) -> StoreResult<Self> {
        let path = Self::path_for(snapshot);
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    log::debug!("Acquired snapshot lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let owner = read_owner(&path);
                    if let Some(pid) = owner.filter(|pid| process_alive(*pid)) {
                        return Err(StoreError::Locked {
                            path: snapshot.display().to_string(),
                            pid,
                        });
                    }
                    log::warn!(
                        "Removing stale snapshot lock {} left by {}",
                        path.display(),
                        owner.map_or_else(|| "an unknown process".to_string(), |pid| format!("process {}", pid))
                    );
                    match std::fs::remove_file(&path) {
                        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        // Another process took the lock between removal and creation
        Err(StoreError::Unavailable(format!(
            "could not take snapshot lock {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released snapshot lock {}", self.path.display()),
            Err(e) => log::warn!(
                "Could not remove snapshot lock {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
