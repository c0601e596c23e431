//! Unexpected close reports.
//!
//! For every session that did not exit cleanly, a later run writes a pair of files
//! under `<lock_dir>/crashes/`:
//!
//! ```text
//! session_<ID>.crash.json   machine-readable report (written once, never rewritten)
//! session_<ID>.crash.md     rendering of the JSON plus a pre-filled issue body
//! ```
//!
//! The JSON is the source of truth. If only the Markdown is missing it is rebuilt
//! from the JSON, never from the markers, so a report describes the state observed
//! the first time it was written.
//!
//! Only the newest [`MAX_CRASH_REPORTS_KEPT`] pairs are kept, ranked by mtime.

pub mod catalog;
mod coredump;
mod markdown;
mod redact;
mod tail;

pub use coredump::{CoreDumpDiagnostics, CoreDumpProbe, SystemCoreDumpProbe};
pub use markdown::build_markdown;
pub use redact::{redact_sensitive_content, REDACTED};
pub use tail::{read_redacted_log_tail, MAX_LINE_BYTES};

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{classify_with_liveness, ExitClass, ExitClassification};
use crate::error::{LifelineError, Result};
use crate::fsutil::{ensure_dir, exists, process_ids, write_atomic};
use crate::logging::session_log_path;
use crate::markers::{self, marker_value, require_args};

pub const CRASH_REPORTS_DIR: &str = "crashes";
pub const LOG_TAIL_LINES: usize = 120;
pub const MAX_CRASH_REPORTS_KEPT: usize = 20;
pub const REPORT_VERSION: u32 = 1;

const JSON_SUFFIX: &str = ".crash.json";
const MARKDOWN_SUFFIX: &str = ".crash.md";

pub fn crash_reports_dir(lock_dir: &Path) -> PathBuf {
    lock_dir.join(CRASH_REPORTS_DIR)
}

pub fn crash_report_json_path(reports_dir: &Path, session_id: &str) -> PathBuf {
    reports_dir.join(format!("session_{}{}", session_id, JSON_SUFFIX))
}

pub fn crash_report_markdown_path(reports_dir: &Path, session_id: &str) -> PathBuf {
    reports_dir.join(format!("session_{}{}", session_id, MARKDOWN_SUFFIX))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Report Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnexpectedCloseReport {
    pub report_version: u32,
    pub generated_at: DateTime<Utc>,
    pub session_id: String,
    pub classification: ExitClassification,
    /// PID of the crashed process, read back from its markers. Zero if unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub startup_pid: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub startup_ppid: u32,
    pub marker_files: MarkerFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_log_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_log_tail_redacted: Vec<String>,
    pub reporter_process: ReporterProcess,
    pub core_dump_diagnostics: CoreDumpDiagnostics,
    pub issue_template: IssueTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_markdown_ref: Option<PathBuf>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerFiles {
    pub startup: PathBuf,
    pub shutdown: PathBuf,
    pub abrupt: PathBuf,
}

impl MarkerFiles {
    pub fn for_session(lock_dir: &Path, session_id: &str) -> Self {
        MarkerFiles {
            startup: markers::startup_marker_path(lock_dir, session_id),
            shutdown: markers::shutdown_marker_path(lock_dir, session_id),
            abrupt: markers::abrupt_marker_path(lock_dir, session_id),
        }
    }
}

/// The process that wrote the report, not the one that crashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterProcess {
    pub generated_by: String,
    pub version: String,
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub pid: u32,
    pub ppid: u32,
}

impl ReporterProcess {
    pub fn current() -> Self {
        let (pid, ppid) = process_ids();
        ReporterProcess {
            generated_by: "lifeline".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            os_version: sysinfo::System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
            arch: std::env::consts::ARCH.to_string(),
            pid,
            ppid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTemplate {
    pub title: String,
    pub summary: String,
}

impl IssueTemplate {
    fn for_session(session_id: &str) -> Self {
        IssueTemplate {
            title: format!("Unexpected close in session {}", session_id),
            summary: "The application closed unexpectedly and generated this report automatically."
                .to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reporter
// ═══════════════════════════════════════════════════════════════════════════════

/// Writes unexpected close reports, using `probe` for core dump diagnostics.
pub struct CrashReporter {
    probe: Box<dyn CoreDumpProbe>,
}

impl Default for CrashReporter {
    fn default() -> Self {
        Self::new(Box::new(SystemCoreDumpProbe))
    }
}

impl std::fmt::Debug for CrashReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashReporter").finish_non_exhaustive()
    }
}

impl CrashReporter {
    pub fn new(probe: Box<dyn CoreDumpProbe>) -> Self {
        CrashReporter { probe }
    }

    /// Writes the report pair for `session_id` and returns the JSON path.
    ///
    /// Returns `Ok(None)` when there is nothing to report: the session exited
    /// cleanly, or its lock is still held by a running process.
    pub fn write(&self, lock_dir: &Path, session_id: &str) -> Result<Option<PathBuf>> {
        require_args(lock_dir, session_id)?;

        let classification = classify_with_liveness(lock_dir, session_id)?;
        if classification.class == ExitClass::CleanExit {
            return Ok(None);
        }
        if classification.owner_alive == Some(true) {
            debug!(session_id, "Skipping crash report for running session");
            return Ok(None);
        }

        let reports_dir = crash_reports_dir(lock_dir);
        ensure_dir(&reports_dir)?;
        prune_old_crash_reports(&reports_dir, MAX_CRASH_REPORTS_KEPT);

        let json_path = crash_report_json_path(&reports_dir, session_id);
        let markdown_path = crash_report_markdown_path(&reports_dir, session_id);

        if exists(&json_path)? {
            if exists(&markdown_path)? {
                return Ok(Some(json_path));
            }
            let raw = fs::read_to_string(&json_path)
                .map_err(|err| LifelineError::io("read crash report", err))?;
            let existing: UnexpectedCloseReport = serde_json::from_str(&raw)
                .map_err(|err| LifelineError::json(format!("parse {}", json_path.display()), err))?;
            write_atomic(&markdown_path, build_markdown(&existing).as_bytes())?;
            debug!(session_id, "Regenerated crash report markdown");
            return Ok(Some(json_path));
        }

        let report = self.build(lock_dir, session_id, classification, &markdown_path);
        let mut payload = serde_json::to_string_pretty(&report)
            .map_err(|err| LifelineError::json("serialize crash report", err))?;
        payload.push('\n');
        write_atomic(&json_path, payload.as_bytes())?;
        write_atomic(&markdown_path, build_markdown(&report).as_bytes())?;

        // The cap holds after this write too, not only before it.
        prune_old_crash_reports(&reports_dir, MAX_CRASH_REPORTS_KEPT);

        info!(
            session_id,
            class = %report.classification.class,
            path = %json_path.display(),
            "Wrote unexpected close report"
        );
        Ok(Some(json_path))
    }

    fn build(
        &self,
        lock_dir: &Path,
        session_id: &str,
        classification: ExitClassification,
        markdown_path: &Path,
    ) -> UnexpectedCloseReport {
        let (startup_pid, startup_ppid) = read_startup_process_ids(lock_dir, session_id);

        let log_path = session_log_path(lock_dir, session_id);
        let (session_log_file, session_log_tail_redacted) = if log_path.is_file() {
            let tail = read_redacted_log_tail(&log_path, LOG_TAIL_LINES);
            (Some(log_path), tail)
        } else {
            (None, Vec::new())
        };

        UnexpectedCloseReport {
            report_version: REPORT_VERSION,
            generated_at: Utc::now(),
            session_id: session_id.to_string(),
            classification,
            startup_pid,
            startup_ppid,
            marker_files: MarkerFiles::for_session(lock_dir, session_id),
            session_log_file,
            session_log_tail_redacted,
            reporter_process: ReporterProcess::current(),
            core_dump_diagnostics: self.probe.collect(),
            issue_template: IssueTemplate::for_session(session_id),
            generated_markdown_ref: Some(markdown_path.to_path_buf()),
        }
    }
}

/// [`CrashReporter::write`] with the platform core dump probe.
pub fn write_unexpected_close_report(lock_dir: &Path, session_id: &str) -> Result<Option<PathBuf>> {
    CrashReporter::default().write(lock_dir, session_id)
}

/// PID and PPID of the crashed process from its startup marker, or from the abrupt
/// marker once the startup marker is gone. The abrupt marker carries the detecting
/// process's IDs, so this fallback is a last resort.
fn read_startup_process_ids(lock_dir: &Path, session_id: &str) -> (u32, u32) {
    let raw = fs::read_to_string(markers::startup_marker_path(lock_dir, session_id))
        .or_else(|_| fs::read_to_string(markers::abrupt_marker_path(lock_dir, session_id)));
    let Ok(raw) = raw else {
        return (0, 0);
    };
    let parse = |key: &str| {
        marker_value(&raw, key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    };
    (parse("pid"), parse("ppid"))
}

/// Deletes the oldest report pairs beyond `keep`, newest by mtime first.
///
/// Best effort: failures are logged. Returns the number of JSON reports removed.
pub fn prune_old_crash_reports(reports_dir: &Path, keep: usize) -> usize {
    let entries = match fs::read_dir(reports_dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, "Failed to list crash reports for pruning");
            }
            return 0;
        }
    };

    let mut reports: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|entry| {
            entry.file_name().to_str().map_or(false, |name| {
                name.starts_with("session_") && name.ends_with(JSON_SUFFIX)
            })
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .collect();

    if reports.len() <= keep {
        return 0;
    }
    reports.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, json_path) in reports.into_iter().skip(keep) {
        let markdown_path = markdown_sibling(&json_path);
        match fs::remove_file(&json_path) {
            Ok(()) => removed += 1,
            Err(err) => {
                warn!(error = %err, "Failed to prune crash report");
                continue;
            }
        }
        if let Err(err) = crate::fsutil::remove_if_exists(&markdown_path) {
            warn!(error = %err, path = %markdown_path.display(), "Failed to prune crash report markdown");
        }
    }
    removed
}

pub(crate) fn markdown_sibling(json_path: &Path) -> PathBuf {
    let name = json_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(JSON_SUFFIX))
        .map(|stem| format!("{}{}", stem, MARKDOWN_SUFFIX));
    match name {
        Some(name) => json_path.with_file_name(name),
        None => json_path.with_extension("md"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{mark_abrupt_exits, write_shutdown_marker, write_startup_marker};
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    struct FixedProbe;

    impl CoreDumpProbe for FixedProbe {
        fn collect(&self) -> CoreDumpDiagnostics {
            CoreDumpDiagnostics {
                rlimit_core_soft: "0".to_string(),
                rlimit_core_hard: "unlimited".to_string(),
                hint: "fixed".to_string(),
            }
        }
    }

    fn reporter() -> CrashReporter {
        CrashReporter::new(Box::new(FixedProbe))
    }

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 10, 0, 0).unwrap()
    }

    #[test]
    fn writes_report_pair_with_redacted_tail() {
        let temp = tempdir().unwrap();
        let lock_dir = temp.path();
        write_startup_marker(lock_dir, "crash-test-1", started()).unwrap();
        mark_abrupt_exits(lock_dir, started() + Duration::minutes(3), &[]).unwrap();
        std::fs::write(
            session_log_path(lock_dir, "crash-test-1"),
            "{\"level\":\"info\",\"message\":\"opening https://example.com/path?a=1&b=2\"}\n\
             {\"level\":\"warn\",\"message\":\"callback code=abc token=def\"}\n",
        )
        .unwrap();

        let json_path = reporter().write(lock_dir, "crash-test-1").unwrap().unwrap();
        assert_eq!(
            json_path,
            lock_dir.join("crashes").join("session_crash-test-1.crash.json")
        );
        assert!(markdown_sibling(&json_path).exists());

        let raw = std::fs::read_to_string(&json_path).unwrap();
        assert!(raw.ends_with("}\n"));
        let payload: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload["session_id"], "crash-test-1");
        assert_eq!(payload["classification"]["class"], "main_process_crash_or_abrupt");
        assert_eq!(payload["startup_pid"], std::process::id());
        assert_eq!(payload["core_dump_diagnostics"]["rlimit_core_soft"], "0");

        let tail = payload["session_log_tail_redacted"].as_array().unwrap();
        assert_eq!(tail.len(), 2);
        let text: String = tail.iter().filter_map(|line| line.as_str()).collect();
        assert!(!text.contains("?a=1&b=2"));
        assert!(!text.contains("code=abc"));
        assert!(!text.contains("token=def"));
    }

    #[test]
    fn clean_exit_produces_no_report() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "clean", started()).unwrap();
        write_shutdown_marker(temp.path(), "clean", started() + Duration::minutes(1)).unwrap();

        assert_eq!(reporter().write(temp.path(), "clean").unwrap(), None);
        assert!(!crash_reports_dir(temp.path()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn running_session_produces_no_report() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "running", started()).unwrap();
        let _lock = crate::lock::lock_session(temp.path(), "running").unwrap();

        assert_eq!(reporter().write(temp.path(), "running").unwrap(), None);
    }

    #[test]
    fn second_write_is_idempotent_and_restores_markdown() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "s1", started()).unwrap();
        mark_abrupt_exits(temp.path(), started() + Duration::minutes(5), &[]).unwrap();

        let first = reporter().write(temp.path(), "s1").unwrap().unwrap();
        let first_json = std::fs::read(&first).unwrap();
        let markdown = markdown_sibling(&first);
        let first_markdown = std::fs::read_to_string(&markdown).unwrap();
        std::fs::remove_file(&markdown).unwrap();

        let second = reporter().write(temp.path(), "s1").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), first_json);
        assert_eq!(std::fs::read_to_string(&markdown).unwrap(), first_markdown);
    }

    #[test]
    fn missing_log_leaves_tail_out() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "nolog", started()).unwrap();

        let path = reporter().write(temp.path(), "nolog").unwrap().unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(payload.get("session_log_file").is_none());
        assert!(payload.get("session_log_tail_redacted").is_none());
        assert_eq!(payload["classification"]["class"], "external_kill_or_oom_inferred");
    }

    #[test]
    fn startup_ids_fall_back_to_abrupt_marker() {
        let temp = tempdir().unwrap();
        std::fs::write(
            markers::abrupt_marker_path(temp.path(), "s1"),
            "detected_at=2026-02-08T10:05:00Z\nstarted_at=\npid=4242\nppid=1\n",
        )
        .unwrap();
        assert_eq!(read_startup_process_ids(temp.path(), "s1"), (4242, 1));
        assert_eq!(read_startup_process_ids(temp.path(), "absent"), (0, 0));
    }

    #[test]
    fn prune_keeps_newest_pairs() {
        let temp = tempdir().unwrap();
        let dir = temp.path();
        let base = SystemTime::now() - std::time::Duration::from_secs(3600);
        for i in 0..5u64 {
            let json = crash_report_json_path(dir, &format!("r{}", i));
            std::fs::write(&json, "{}").unwrap();
            std::fs::write(markdown_sibling(&json), "#").unwrap();
            let file = std::fs::File::options().write(true).open(&json).unwrap();
            file.set_modified(base + std::time::Duration::from_secs(i * 60))
                .unwrap();
        }

        assert_eq!(prune_old_crash_reports(dir, 2), 3);
        for i in 0..5u64 {
            let json = crash_report_json_path(dir, &format!("r{}", i));
            assert_eq!(json.exists(), i >= 3, "report r{}", i);
            assert_eq!(markdown_sibling(&json).exists(), i >= 3, "markdown r{}", i);
        }
    }

    #[test]
    fn empty_arguments_are_rejected() {
        assert!(matches!(
            write_unexpected_close_report(Path::new(""), "s1"),
            Err(LifelineError::MissingLockDir)
        ));
    }
}
