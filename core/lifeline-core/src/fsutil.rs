//! Small file-system and process helpers shared by the marker, lock, and report modules.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use fs_err as fs;
use tempfile::NamedTempFile;

use crate::error::{LifelineError, Result};

pub(crate) const DIR_PERM: u32 = 0o755;
pub(crate) const LOCK_FILE_PERM: u32 = 0o600;

/// Creates `dir` (and parents) with mode 0755 if it does not exist.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_PERM);
    }
    builder
        .create(dir)
        .map_err(|err| LifelineError::io(format!("create directory {}", dir.display()), err))
}

/// Writes `contents` to a temp file next to `path`, then renames it over `path`.
///
/// Readers never observe a half-written file. The temp file is created 0600.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        LifelineError::io(
            format!("resolve parent of {}", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;
    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|err| LifelineError::io(format!("create temp file in {}", parent.display()), err))?;
    temp.write_all(contents)
        .map_err(|err| LifelineError::io(format!("write temp file for {}", path.display()), err))?;
    temp.flush()
        .map_err(|err| LifelineError::io(format!("flush temp file for {}", path.display()), err))?;
    temp.persist(path)
        .map_err(|err| LifelineError::io(format!("persist {}", path.display()), err.error))?;
    Ok(())
}

/// Returns true if `path` exists. Errors other than NotFound are propagated.
pub(crate) fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(LifelineError::io("stat", err)),
    }
}

/// Removes `path`, treating an already-missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// (pid, ppid) of the current process. ppid is 0 where the platform has no notion of it.
pub(crate) fn process_ids() -> (u32, u32) {
    let pid = std::process::id();
    #[cfg(unix)]
    let ppid = std::os::unix::process::parent_id();
    #[cfg(not(unix))]
    let ppid = 0;
    (pid, ppid)
}

/// RFC 3339 with as many fractional digits as needed, always `Z`.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
