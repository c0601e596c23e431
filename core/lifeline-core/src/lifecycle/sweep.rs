//! Background reconciliation of sessions whose owner died without ending them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn, Span};

use super::{prune_exited_sessions, CleanupPolicy, SessionRepository};
use crate::lock::{probe_session_lock, LockProbe};
use crate::types::{SessionId, SessionType};

/// How many of the most recent sessions the stale sweep inspects.
pub const RECENT_SESSIONS_LIMIT: usize = 200;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaleSweepStats {
    pub examined: usize,
    pub ended: Vec<String>,
    pub skipped_no_lock: usize,
    pub skipped_alive: usize,
    pub errors: Vec<String>,
}

/// Ends active sessions of `session_type` whose lock file can be taken without
/// blocking.
///
/// Sessions without a lock file are left alone, as is `own_id`. One failing session
/// never stops the sweep.
pub fn end_stale_sessions(
    repo: &dyn SessionRepository,
    lock_dir: &Path,
    session_type: SessionType,
    own_id: &SessionId,
    now: DateTime<Utc>,
) -> StaleSweepStats {
    let mut stats = StaleSweepStats::default();

    let recent = match repo.recent_sessions(RECENT_SESSIONS_LIMIT) {
        Ok(recent) => recent,
        Err(err) => {
            warn!(error = %err, "Failed to list recent sessions for stale sweep");
            stats.errors.push(format!("recent sessions: {}", err));
            return stats;
        }
    };

    for session in recent {
        if session.session_type != session_type || !session.is_active() || &session.id == own_id {
            continue;
        }
        stats.examined += 1;

        let lock = match probe_session_lock(lock_dir, session.id.as_str()) {
            Ok(LockProbe::Missing) => {
                stats.skipped_no_lock += 1;
                continue;
            }
            Ok(LockProbe::Alive) => {
                stats.skipped_alive += 1;
                continue;
            }
            Ok(LockProbe::Abandoned(lock)) => lock,
            Err(err) => {
                warn!(error = %err, session_id = %session.id, "Failed to probe session lock");
                stats.errors.push(format!("{}: {}", session.id, err));
                continue;
            }
        };

        if let Err(err) = repo.end_session(&session.id, now) {
            warn!(error = %err, session_id = %session.id, "Failed to end stale session");
            stats.errors.push(format!("{}: {}", session.id, err));
            // Keep the lock file so the next sweep retries this session.
            if let Err(err) = lock.unlock() {
                warn!(error = %err, session_id = %session.id, "Failed to unlock stale session lock");
            }
            continue;
        }

        info!(session_id = %session.id, "Ended stale session (lock abandoned)");
        if let Err(err) = lock.release() {
            warn!(error = %err, session_id = %session.id, "Failed to release stale session lock");
        }
        stats.ended.push(session.id.to_string());
    }

    stats
}

/// Runs the stale sweep and then pruning on a detached thread.
///
/// The thread holds its own handles, so it keeps going after the caller returns.
/// `span` is entered for the lifetime of the thread.
pub fn spawn_housekeeping(
    repo: Arc<dyn SessionRepository>,
    lock_dir: PathBuf,
    session_type: SessionType,
    own_id: SessionId,
    policy: CleanupPolicy,
    span: Span,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let _entered = span.enter();

        let stats = end_stale_sessions(repo.as_ref(), &lock_dir, session_type, &own_id, Utc::now());
        debug!(
            examined = stats.examined,
            ended = stats.ended.len(),
            skipped_no_lock = stats.skipped_no_lock,
            skipped_alive = stats.skipped_alive,
            errors = stats.errors.len(),
            "Stale session sweep finished"
        );

        let outcome = prune_exited_sessions(repo.as_ref(), &policy, Utc::now());
        if outcome.total_deleted() > 0 {
            info!(deleted = outcome.total_deleted(), "Cleaned up old sessions");
        }
    })
}
