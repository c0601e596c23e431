//! Exit classification from marker files.
//!
//! A pure function of which markers exist for a session and what they contain.
//! Nothing here is cached; callers recompute on demand.
//!
//! Priority order:
//!
//! | markers present            | class                            | inference          |
//! |----------------------------|----------------------------------|--------------------|
//! | shutdown (any others)      | `clean_exit`                     | `marker-confirmed` |
//! | abrupt, no shutdown        | `main_process_crash_or_abrupt`   | `marker-confirmed` |
//! | startup only               | `external_kill_or_oom_inferred`  | `best-effort`      |
//! | none                       | `unknown`                        | `marker-missing`   |
//!
//! A startup-only session is either still running or was killed before any later
//! process ran the abrupt sweep. [`classify_with_liveness`] separates the two by
//! probing the session lock without changing the class.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifelineError, Result};
use crate::lock::{probe_session_lock, LockProbe};
use crate::markers::{self, read_marker, require_args, MarkerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    CleanExit,
    MainProcessCrashOrAbrupt,
    ExternalKillOrOomInferred,
    Unknown,
}

impl ExitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitClass::CleanExit => "clean_exit",
            ExitClass::MainProcessCrashOrAbrupt => "main_process_crash_or_abrupt",
            ExitClass::ExternalKillOrOomInferred => "external_kill_or_oom_inferred",
            ExitClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Inference {
    MarkerConfirmed,
    BestEffort,
    MarkerMissing,
}

impl Inference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Inference::MarkerConfirmed => "marker-confirmed",
            Inference::BestEffort => "best-effort",
            Inference::MarkerMissing => "marker-missing",
        }
    }
}

impl std::fmt::Display for Inference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitClassification {
    pub session_id: String,
    pub class: ExitClass,
    pub inference: Inference,
    pub reason: String,
    #[serde(default)]
    pub startup_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shutdown_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub abrupt_detected_at: Option<DateTime<Utc>>,
    /// Latest modification time across the marker files. Ordering only.
    #[serde(default)]
    pub last_marker_observed: Option<DateTime<Utc>>,
    /// Set only by [`classify_with_liveness`] for best-effort sessions that still
    /// have a lock file: `true` while the owner holds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_alive: Option<bool>,
}

impl ExitClassification {
    fn unknown(session_id: &str) -> Self {
        ExitClassification {
            session_id: session_id.to_string(),
            class: ExitClass::Unknown,
            inference: Inference::MarkerMissing,
            reason: "no known marker files found for session".to_string(),
            startup_at: None,
            shutdown_at: None,
            abrupt_detected_at: None,
            last_marker_observed: None,
            owner_alive: None,
        }
    }
}

/// Classifies how `session_id` ended, looking only at its marker files.
pub fn classify_session_exit(lock_dir: &Path, session_id: &str) -> Result<ExitClassification> {
    require_args(lock_dir, session_id)?;

    let startup = read_marker(&MarkerKind::Startup.path(lock_dir, session_id))?;
    let shutdown = read_marker(&MarkerKind::Shutdown.path(lock_dir, session_id))?;
    let abrupt = read_marker(&MarkerKind::Abrupt.path(lock_dir, session_id))?;

    let mut classification = ExitClassification::unknown(session_id);

    // The startup marker is removed on clean shutdown; the shutdown marker keeps a copy.
    classification.startup_at = startup
        .as_ref()
        .and_then(|marker| marker.leading_time())
        .or_else(|| shutdown.as_ref().and_then(|marker| marker.time_value("started_at")));
    classification.shutdown_at = shutdown.as_ref().and_then(|marker| marker.leading_time());
    classification.abrupt_detected_at = abrupt
        .as_ref()
        .and_then(|marker| marker.time_value("detected_at"));
    classification.last_marker_observed = [&startup, &shutdown, &abrupt]
        .into_iter()
        .filter_map(|marker| marker.as_ref().and_then(|m| m.modified))
        .max();

    if shutdown.is_some() {
        classification.class = ExitClass::CleanExit;
        classification.inference = Inference::MarkerConfirmed;
        classification.reason = "shutdown marker present".to_string();
    } else if abrupt.is_some() {
        classification.class = ExitClass::MainProcessCrashOrAbrupt;
        classification.inference = Inference::MarkerConfirmed;
        classification.reason = "abrupt marker present and no shutdown marker".to_string();
    } else if startup.is_some() {
        classification.class = ExitClass::ExternalKillOrOomInferred;
        classification.inference = Inference::BestEffort;
        classification.reason = "startup marker present without shutdown/abrupt markers".to_string();
    }

    Ok(classification)
}

/// [`classify_session_exit`], plus a lock probe for best-effort sessions.
///
/// The class is left untouched; `owner_alive` and `reason` record what the lock says.
pub fn classify_with_liveness(lock_dir: &Path, session_id: &str) -> Result<ExitClassification> {
    let mut classification = classify_session_exit(lock_dir, session_id)?;
    if classification.class != ExitClass::ExternalKillOrOomInferred {
        return Ok(classification);
    }

    match probe_session_lock(lock_dir, session_id)? {
        LockProbe::Missing => {}
        LockProbe::Alive => {
            classification.owner_alive = Some(true);
            classification.reason =
                "startup marker present and session lock still held; owner is running".to_string();
        }
        LockProbe::Abandoned(lock) => {
            classification.owner_alive = Some(false);
            classification.reason =
                "startup marker present and session lock abandoned; owner exited without shutdown"
                    .to_string();
            // The lock belongs to a dead session; leave the file for the stale sweep.
            lock.unlock()?;
        }
    }
    Ok(classification)
}

/// Classifies every session that has any marker file, most recent activity first.
pub fn build_exit_report(lock_dir: &Path) -> Result<Vec<ExitClassification>> {
    if lock_dir.as_os_str().is_empty() {
        return Err(LifelineError::MissingLockDir);
    }

    let mut report = markers::discover_session_ids(lock_dir)?
        .iter()
        .map(|session_id| classify_with_liveness(lock_dir, session_id))
        .collect::<Result<Vec<_>>>()?;

    report.sort_by(|a, b| {
        b.last_marker_observed
            .cmp(&a.last_marker_observed)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::lock_session;
    use crate::markers::{mark_abrupt_exits, write_shutdown_marker, write_startup_marker};
    use chrono::{Duration, TimeZone};
    use tempfile::tempdir;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 10, 0, 0).unwrap()
    }

    #[test]
    fn startup_only_is_inferred_external_kill() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "s1", base_time()).unwrap();

        let c = classify_session_exit(temp.path(), "s1").unwrap();
        assert_eq!(c.class, ExitClass::ExternalKillOrOomInferred);
        assert_eq!(c.inference, Inference::BestEffort);
        assert_eq!(c.startup_at, Some(base_time()));
        assert!(c.last_marker_observed.is_some());
    }

    #[test]
    fn shutdown_wins_over_abrupt() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "s1", base_time()).unwrap();
        mark_abrupt_exits(temp.path(), base_time() + Duration::minutes(1), &[]).unwrap();
        // Recreate both markers by hand; write_shutdown_marker would retire the abrupt one.
        std::fs::write(
            MarkerKind::Shutdown.path(temp.path(), "s1"),
            "2026-02-08T10:02:00Z\nstarted_at=2026-02-08T10:00:00Z\npid=1\nppid=1\n",
        )
        .unwrap();

        let c = classify_session_exit(temp.path(), "s1").unwrap();
        assert_eq!(c.class, ExitClass::CleanExit);
        assert_eq!(c.inference, Inference::MarkerConfirmed);
        assert_eq!(c.abrupt_detected_at, Some(base_time() + Duration::minutes(1)));
    }

    #[test]
    fn clean_exit_falls_back_to_embedded_started_at() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "s1", base_time()).unwrap();
        write_shutdown_marker(temp.path(), "s1", base_time() + Duration::minutes(3)).unwrap();

        let c = classify_session_exit(temp.path(), "s1").unwrap();
        assert_eq!(c.class, ExitClass::CleanExit);
        assert_eq!(c.startup_at, Some(base_time()));
        assert_eq!(c.shutdown_at, Some(base_time() + Duration::minutes(3)));
    }

    #[test]
    fn abrupt_marker_is_marker_confirmed_crash() {
        let temp = tempdir().unwrap();
        let detected_at = base_time() + Duration::minutes(5);
        write_startup_marker(temp.path(), "s1", base_time()).unwrap();
        mark_abrupt_exits(temp.path(), detected_at, &[]).unwrap();

        let c = classify_session_exit(temp.path(), "s1").unwrap();
        assert_eq!(c.class, ExitClass::MainProcessCrashOrAbrupt);
        assert_eq!(c.inference, Inference::MarkerConfirmed);
        assert_eq!(c.abrupt_detected_at, Some(detected_at));
        assert_eq!(c.startup_at, Some(base_time()));
    }

    #[test]
    fn no_markers_is_unknown() {
        let temp = tempdir().unwrap();
        let c = classify_session_exit(temp.path(), "ghost").unwrap();
        assert_eq!(c.class, ExitClass::Unknown);
        assert_eq!(c.inference, Inference::MarkerMissing);
        assert_eq!(c.last_marker_observed, None);
    }

    #[test]
    fn malformed_timestamps_do_not_fail_classification() {
        let temp = tempdir().unwrap();
        std::fs::write(MarkerKind::Startup.path(temp.path(), "s1"), "not-a-time\npid=1\n").unwrap();

        let c = classify_session_exit(temp.path(), "s1").unwrap();
        assert_eq!(c.class, ExitClass::ExternalKillOrOomInferred);
        assert_eq!(c.startup_at, None);
    }

    #[test]
    fn empty_arguments_are_configuration_errors() {
        let temp = tempdir().unwrap();
        assert!(matches!(
            classify_session_exit(Path::new(""), "s1"),
            Err(LifelineError::MissingLockDir)
        ));
        assert!(matches!(
            classify_session_exit(temp.path(), ""),
            Err(LifelineError::MissingSessionId)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn liveness_distinguishes_running_from_dead() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "running", base_time()).unwrap();
        write_startup_marker(temp.path(), "dead", base_time()).unwrap();
        let _held = lock_session(temp.path(), "running").unwrap();
        drop(lock_session(temp.path(), "dead").unwrap());

        let running = classify_with_liveness(temp.path(), "running").unwrap();
        assert_eq!(running.class, ExitClass::ExternalKillOrOomInferred);
        assert_eq!(running.owner_alive, Some(true));

        let dead = classify_with_liveness(temp.path(), "dead").unwrap();
        assert_eq!(dead.class, ExitClass::ExternalKillOrOomInferred);
        assert_eq!(dead.owner_alive, Some(false));
        assert!(crate::lock::session_lock_path(temp.path(), "dead").exists());
    }

    #[test]
    fn exit_report_covers_every_marked_session() {
        let temp = tempdir().unwrap();
        write_startup_marker(temp.path(), "a", base_time()).unwrap();
        write_startup_marker(temp.path(), "b", base_time()).unwrap();
        write_shutdown_marker(temp.path(), "b", base_time() + Duration::minutes(1)).unwrap();
        write_startup_marker(temp.path(), "c", base_time()).unwrap();
        mark_abrupt_exits(temp.path(), base_time() + Duration::minutes(2), &["a".to_string()])
            .unwrap();

        let report = build_exit_report(temp.path()).unwrap();
        let mut classes: Vec<_> = report
            .iter()
            .map(|c| (c.session_id.as_str(), c.class))
            .collect();
        classes.sort();
        assert_eq!(
            classes,
            vec![
                ("a", ExitClass::ExternalKillOrOomInferred),
                ("b", ExitClass::CleanExit),
                ("c", ExitClass::MainProcessCrashOrAbrupt),
            ]
        );
        for pair in report.windows(2) {
            assert!(pair[0].last_marker_observed >= pair[1].last_marker_observed);
        }
    }

    #[test]
    fn serializes_with_snake_case_classes() {
        let mut c = ExitClassification::unknown("s1");
        c.class = ExitClass::MainProcessCrashOrAbrupt;
        c.inference = Inference::MarkerConfirmed;
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["class"], "main_process_crash_or_abrupt");
        assert_eq!(value["inference"], "marker-confirmed");
        assert!(value.get("owner_alive").is_none());
    }
}
