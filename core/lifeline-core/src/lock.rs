//! Per-session advisory lock files.
//!
//! Each live session holds an exclusive `flock` on `session_<ID>.lock` in the shared
//! lock directory for its whole lifetime. The OS drops advisory locks when the holder
//! exits for any reason, including crashes and OOM kills, so a second process that
//! can take the lock without blocking has proof that the owner is gone.
//!
//! # Liveness Probe
//!
//! ```text
//! lock file missing      → Missing     (cannot prove death; callers skip)
//! flock(EX|NB) succeeds  → Abandoned   (owner exited; caller now holds the lock)
//! flock(EX|NB) blocks    → Alive       (owner still running)
//! ```
//!
//! Locks are per open file description, so two handles in the same process contend
//! exactly like two processes do.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::warn;

use crate::error::{LifelineError, Result};
use crate::fsutil::{ensure_dir, LOCK_FILE_PERM};
use crate::markers::require_args;

pub fn session_lock_path(lock_dir: &Path, session_id: &str) -> PathBuf {
    lock_dir.join(format!("session_{}.lock", session_id))
}

/// Extracts the session ID from a `session_<ID>.lock` file name.
pub fn parse_lock_file_name(name: &str) -> Option<&str> {
    name.strip_prefix("session_")?
        .strip_suffix(".lock")
        .filter(|id| !id.is_empty())
}

/// An exclusively held session lock. Dropping it closes the descriptor, which
/// releases the lock but leaves the file in place.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the OS lock and closes the file. The lock file stays on disk.
    pub fn unlock(self) -> Result<()> {
        unlock_file(&self.file)
            .map_err(|err| LifelineError::io(format!("unlock {}", self.path.display()), err))
    }

    /// Unlocks, then removes the lock file.
    ///
    /// Removal only happens after a successful unlock so a new process never opens
    /// an inode that is about to disappear while still locked.
    pub fn release(self) -> Result<()> {
        let path = self.path.clone();
        self.unlock()?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LifelineError::io("remove session lock file", err)),
        }
    }
}

/// Creates (or opens) the session's lock file and takes a non-blocking exclusive lock.
///
/// Contention is an expected outcome and returns [`LifelineError::LockHeld`].
pub fn lock_session(lock_dir: &Path, session_id: &str) -> Result<SessionLock> {
    require_args(lock_dir, session_id)?;
    ensure_dir(lock_dir)?;

    let path = session_lock_path(lock_dir, session_id);
    let file = open_lock_file(&path, true)?;

    match try_lock_exclusive(&file) {
        Ok(true) => Ok(SessionLock { file, path }),
        Ok(false) => Err(LifelineError::LockHeld(path)),
        Err(err) => Err(LifelineError::io(format!("lock {}", path.display()), err)),
    }
}

/// Result of probing another session's lock file.
#[derive(Debug)]
pub enum LockProbe {
    /// No lock file. Liveness cannot be proven either way.
    Missing,
    /// Lock is held by a live process.
    Alive,
    /// The owner is gone; the probing process now holds the lock.
    Abandoned(SessionLock),
}

/// Opens an existing lock file and attempts the non-blocking exclusive lock.
pub fn probe_session_lock(lock_dir: &Path, session_id: &str) -> Result<LockProbe> {
    require_args(lock_dir, session_id)?;

    let path = session_lock_path(lock_dir, session_id);
    let file = match open_lock_file(&path, false) {
        Ok(file) => file,
        Err(LifelineError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LockProbe::Missing)
        }
        Err(err) => return Err(err),
    };

    match try_lock_exclusive(&file) {
        Ok(true) => Ok(LockProbe::Abandoned(SessionLock { file, path })),
        Ok(false) => Ok(LockProbe::Alive),
        Err(err) => Err(LifelineError::io(format!("probe {}", path.display()), err)),
    }
}

/// IDs of every session whose lock file is currently held by a live process.
///
/// A lock file that cannot be probed counts as held: only a successful lock proves
/// the owner is gone.
pub fn held_session_ids(lock_dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(lock_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LifelineError::io("read lock directory", err)),
    };

    let mut held = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(session_id) = name.to_str().and_then(parse_lock_file_name) else {
            continue;
        };
        match probe_session_lock(lock_dir, session_id) {
            Ok(LockProbe::Alive) => held.push(session_id.to_string()),
            // Dropping the lock closes the descriptor and releases it.
            Ok(LockProbe::Abandoned(_)) | Ok(LockProbe::Missing) => {}
            Err(err) => {
                warn!(error = %err, session_id = %session_id, "Failed to probe session lock, treating as held");
                held.push(session_id.to_string());
            }
        }
    }
    held.sort();
    Ok(held)
}

fn open_lock_file(path: &Path, create: bool) -> Result<File> {
    let mut options = std::fs::OpenOptions::new();
    options.read(true).write(true).create(create).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(LOCK_FILE_PERM);
    }
    options
        .open(path)
        .map_err(|err| LifelineError::io(format!("open {}", path.display()), err))
}

/// Non-blocking exclusive `flock`. `Ok(false)` means another holder exists.
pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor comes from a live `File` borrowed for the duration
        // of the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) || err.raw_os_error() == Some(libc::EAGAIN)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "advisory session locks require a Unix platform",
        ))
    }
}

fn unlock_file(file: &File) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        // SAFETY: see `try_lock_exclusive`.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if result != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(())
    }
}
