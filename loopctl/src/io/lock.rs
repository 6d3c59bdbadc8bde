//! PID-aware mutual exclusion, one lock file per driver scope.
//!
//! The lock file holds the owner's process id on a single line. A lock whose
//! owner is no longer alive is stale: it is reclaimed with a warning instead
//! of requiring manual cleanup. [`LockHandle`] releases on drop, so every exit
//! path that unwinds removes the file; a killed process leaves a stale lock
//! that the next run reclaims.
//!
//! Inspecting, reclaiming and claiming a lock happen under an exclusive
//! advisory lock on a sibling `<scope>.guard` file, so two runs racing over
//! the same stale lock cannot both end up holding it.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::types::SignalKind;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{scope} run already in progress (pid {pid}, lock {})", .path.display())]
    Contention {
        scope: SignalKind,
        pid: i32,
        path: PathBuf,
    },
    #[error("lock {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Issues locks under a single directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, scope: SignalKind) -> PathBuf {
        self.dir.join(format!("{scope}.lock"))
    }

    fn guard_path(&self, scope: SignalKind) -> PathBuf {
        self.dir.join(format!("{scope}.guard"))
    }

    /// Claim `scope` for the current process.
    ///
    /// Fails with [`LockError::Contention`] without side effects when another
    /// live process holds the lock. A stale lock is removed and the claim
    /// proceeds. A lock naming this process's own pid is stale too: a run
    /// acquires its scope once, so it was left by an earlier process that
    /// had the same pid.
    pub fn acquire(&self, scope: SignalKind) -> Result<LockHandle, LockError> {
        let path = self.lock_path(scope);
        fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let pid = std::process::id();
        let _guard = ClaimGuard::lock(&self.guard_path(scope))?;

        match read_holder(&path)? {
            Holder::Absent => {}
            Holder::Pid(owner) if owner == pid as i32 => {
                warn!(scope = %scope, pid = owner, path = %path.display(), "reclaiming lock left under this pid");
                remove_if_exists(&path)?;
            }
            Holder::Pid(owner) if process_alive(owner) => {
                return Err(LockError::Contention {
                    scope,
                    pid: owner,
                    path,
                });
            }
            Holder::Pid(owner) => {
                warn!(scope = %scope, stale_pid = owner, path = %path.display(), "reclaiming stale lock");
                remove_if_exists(&path)?;
            }
            Holder::Garbled(contents) => {
                warn!(scope = %scope, contents = %contents, path = %path.display(), "reclaiming unreadable lock");
                remove_if_exists(&path)?;
            }
        }

        if try_claim(&path, pid)? {
            info!(scope = %scope, pid, path = %path.display(), "lock acquired");
            return Ok(LockHandle {
                scope,
                path,
                released: false,
            });
        }

        // Only a writer that bypasses the guard can get here.
        debug!(scope = %scope, "lock file appeared while claiming");
        let owner = match read_holder(&path)? {
            Holder::Pid(owner) => owner,
            _ => 0,
        };
        Err(LockError::Contention {
            scope,
            pid: owner,
            path,
        })
    }

    /// Release `handle`; equivalent to dropping it.
    pub fn release(&self, handle: LockHandle) {
        handle.release();
    }
}

/// A held lock. Dropping the handle removes the lock file.
#[derive(Debug)]
pub struct LockHandle {
    scope: SignalKind,
    path: PathBuf,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(scope = %self.scope, path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(scope = %self.scope, "lock file already gone");
            }
            Err(err) => warn!(scope = %self.scope, err = %err, "failed to remove lock file"),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Exclusive advisory lock on the guard file, held while a lock is claimed.
/// The guard file itself is never removed.
struct ClaimGuard {
    file: File,
}

impl ClaimGuard {
    fn lock(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(Self { file })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

enum Holder {
    Absent,
    Pid(i32),
    Garbled(String),
}

fn read_holder(path: &Path) -> Result<Holder, LockError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Holder::Absent),
        Err(source) => {
            return Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let trimmed = contents.trim();
    match trimmed.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Holder::Pid(pid)),
        _ => Ok(Holder::Garbled(trimmed.to_string())),
    }
}

/// Write the pid to a private temp file, then hard-link it into place.
///
/// The link fails if the lock already exists, so a reader never observes a
/// half-written lock file.
fn try_claim(path: &Path, pid: u32) -> Result<bool, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = path.with_extension(format!("lock.{pid}.tmp"));
    {
        let mut tmp = File::create(&tmp_path).map_err(io_err)?;
        writeln!(tmp, "{pid}").map_err(io_err)?;
        tmp.sync_all().map_err(io_err)?;
    }
    let linked = fs::hard_link(&tmp_path, path);
    let _ = fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(io_err(source)),
    }
}

fn remove_if_exists(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Whether a process with `pid` exists.
pub fn process_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid <= 0 {
            return false;
        }
        // Signal 0 probes for existence; EPERM means it exists under another user.
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        pid > 0
    }
}
