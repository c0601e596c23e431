//! Session marker files.
//!
//! Three small text files per session record lifecycle events in the shared lock
//! directory. Only the owning process writes its startup and shutdown markers; the
//! abrupt marker is written later, by a different process run, for sessions that
//! never shut down cleanly.
//!
//! ```text
//! session_<ID>.startup.marker    <started_at>\npid=<n>\nppid=<n>
//! session_<ID>.shutdown.marker   <ended_at>\nstarted_at=<ts>\npid=<n>\nppid=<n>
//! session_<ID>.abrupt.marker     detected_at=<ts>\nstarted_at=<ts>\npid=<n>\nppid=<n>
//! ```
//!
//! A shutdown marker is the terminal artifact for a session: writing it removes the
//! startup marker (its `started_at` is carried forward) and any stale abrupt marker.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use tracing::warn;

use crate::error::{LifelineError, Result};
use crate::fsutil::{
    ensure_dir, exists, format_timestamp, parse_timestamp, process_ids, remove_if_exists,
    write_atomic,
};

const FILE_PREFIX: &str = "session_";
const FILE_SUFFIX: &str = ".marker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Startup,
    Shutdown,
    Abrupt,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 3] = [MarkerKind::Startup, MarkerKind::Shutdown, MarkerKind::Abrupt];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::Startup => "startup",
            MarkerKind::Shutdown => "shutdown",
            MarkerKind::Abrupt => "abrupt",
        }
    }

    pub fn file_name(&self, session_id: &str) -> String {
        format!("{}{}.{}{}", FILE_PREFIX, session_id, self.as_str(), FILE_SUFFIX)
    }

    pub fn path(&self, lock_dir: &Path, session_id: &str) -> PathBuf {
        lock_dir.join(self.file_name(session_id))
    }
}

pub fn startup_marker_path(lock_dir: &Path, session_id: &str) -> PathBuf {
    MarkerKind::Startup.path(lock_dir, session_id)
}

pub fn shutdown_marker_path(lock_dir: &Path, session_id: &str) -> PathBuf {
    MarkerKind::Shutdown.path(lock_dir, session_id)
}

pub fn abrupt_marker_path(lock_dir: &Path, session_id: &str) -> PathBuf {
    MarkerKind::Abrupt.path(lock_dir, session_id)
}

pub(crate) fn require_args(lock_dir: &Path, session_id: &str) -> Result<()> {
    if lock_dir.as_os_str().is_empty() {
        return Err(LifelineError::MissingLockDir);
    }
    if session_id.is_empty() {
        return Err(LifelineError::MissingSessionId);
    }
    Ok(())
}

/// Records that `session_id` started at `started_at` in this process.
pub fn write_startup_marker(
    lock_dir: &Path,
    session_id: &str,
    started_at: DateTime<Utc>,
) -> Result<()> {
    require_args(lock_dir, session_id)?;
    ensure_dir(lock_dir)?;

    let (pid, ppid) = process_ids();
    let body = format!(
        "{}\npid={}\nppid={}\n",
        format_timestamp(started_at),
        pid,
        ppid
    );
    write_atomic(&startup_marker_path(lock_dir, session_id), body.as_bytes())
}

/// Records a clean exit. Presence of this file is definitive proof of a clean exit.
pub fn write_shutdown_marker(
    lock_dir: &Path,
    session_id: &str,
    ended_at: DateTime<Utc>,
) -> Result<()> {
    require_args(lock_dir, session_id)?;
    ensure_dir(lock_dir)?;

    let startup_path = startup_marker_path(lock_dir, session_id);
    let started_at = match fs::read_to_string(&startup_path) {
        Ok(raw) => first_line(&raw).to_string(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(LifelineError::io("read startup marker", err)),
    };

    let (pid, ppid) = process_ids();
    let body = format!(
        "{}\nstarted_at={}\npid={}\nppid={}\n",
        format_timestamp(ended_at),
        started_at,
        pid,
        ppid
    );
    write_atomic(&shutdown_marker_path(lock_dir, session_id), body.as_bytes())?;

    // At most one of {shutdown, abrupt} may exist.
    for stale in [startup_path, abrupt_marker_path(lock_dir, session_id)] {
        if let Err(err) = remove_if_exists(&stale) {
            warn!(error = %err, path = %stale.display(), "Failed to remove superseded marker");
        }
    }
    Ok(())
}

/// Writes an abrupt marker for every session that has a startup marker but neither a
/// shutdown nor an abrupt marker, skipping IDs in `exclude`.
///
/// Returns exactly the newly marked IDs, sorted. Calling it again is a no-op for
/// sessions already marked. A session whose markers cannot be checked or written is
/// logged and skipped; only an unreadable lock directory is an error.
pub fn mark_abrupt_exits(
    lock_dir: &Path,
    detected_at: DateTime<Utc>,
    exclude: &[String],
) -> Result<Vec<String>> {
    if lock_dir.as_os_str().is_empty() {
        return Err(LifelineError::MissingLockDir);
    }

    let (pid, ppid) = process_ids();
    let detected = format_timestamp(detected_at);
    let mut marked = Vec::new();

    for session_id in discover_session_ids_of_kind(lock_dir, Some(MarkerKind::Startup))? {
        if exclude.iter().any(|id| id == &session_id) {
            continue;
        }
        let finished = exists(&shutdown_marker_path(lock_dir, &session_id)).and_then(|shutdown| {
            if shutdown {
                Ok(true)
            } else {
                exists(&abrupt_marker_path(lock_dir, &session_id))
            }
        });
        match finished {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, session_id = %session_id, "Failed to check markers, skipping session");
                continue;
            }
        }

        let started_at = match fs::read_to_string(startup_marker_path(lock_dir, &session_id)) {
            Ok(raw) => first_line(&raw).to_string(),
            Err(err) => {
                warn!(error = %err, session_id = %session_id, "Failed to read startup marker");
                String::new()
            }
        };

        let body = format!(
            "detected_at={}\nstarted_at={}\npid={}\nppid={}\n",
            detected, started_at, pid, ppid
        );
        if let Err(err) = write_atomic(&abrupt_marker_path(lock_dir, &session_id), body.as_bytes()) {
            warn!(error = %err, session_id = %session_id, "Failed to write abrupt marker");
            continue;
        }
        marked.push(session_id);
    }

    Ok(marked)
}

/// Every session ID that has at least one marker file, sorted.
pub fn discover_session_ids(lock_dir: &Path) -> Result<Vec<String>> {
    discover_session_ids_of_kind(lock_dir, None)
}

fn discover_session_ids_of_kind(lock_dir: &Path, kind: Option<MarkerKind>) -> Result<Vec<String>> {
    let entries = match fs::read_dir(lock_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LifelineError::io("read lock directory", err)),
    };

    let mut ids = BTreeSet::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some((session_id, found)) = parse_marker_file_name(name) else {
            continue;
        };
        if kind.map_or(true, |wanted| wanted == found) {
            ids.insert(session_id.to_string());
        }
    }
    Ok(ids.into_iter().collect())
}

/// Splits `session_<ID>.<kind>.marker` into its ID and kind. Foreign names yield `None`.
pub fn parse_marker_file_name(name: &str) -> Option<(&str, MarkerKind)> {
    let trimmed = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    MarkerKind::ALL.iter().find_map(|kind| {
        let id = trimmed.strip_suffix(kind.as_str())?.strip_suffix('.')?;
        (!id.is_empty()).then_some((id, *kind))
    })
}

/// A marker file read from disk along with its modification time.
#[derive(Debug, Clone)]
pub struct MarkerSnapshot {
    pub contents: String,
    pub modified: Option<DateTime<Utc>>,
}

impl MarkerSnapshot {
    /// Timestamp on the first line (startup and shutdown markers).
    pub fn leading_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(first_line(&self.contents))
    }

    /// Timestamp stored under `key=`.
    pub fn time_value(&self, key: &str) -> Option<DateTime<Utc>> {
        marker_value(&self.contents, key).and_then(parse_timestamp)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        marker_value(&self.contents, key)
    }
}

/// Reads a marker, returning `None` if it does not exist.
pub fn read_marker(path: &Path) -> Result<Option<MarkerSnapshot>> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LifelineError::io("stat marker", err)),
    };
    let contents =
        fs::read_to_string(path).map_err(|err| LifelineError::io("read marker", err))?;
    Ok(Some(MarkerSnapshot {
        contents,
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }))
}

/// Value of the first `key=value` line whose key equals `key`.
pub fn marker_value<'a>(raw: &'a str, key: &str) -> Option<&'a str> {
    raw.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn first_line(raw: &str) -> &str {
    raw.trim().lines().next().unwrap_or_default().trim()
}
