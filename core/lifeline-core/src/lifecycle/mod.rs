//! Session lifecycle: start, persist once, reconcile stale sessions, end.
//!
//! ```text
//! created ──start──▶ persisting ──ensure_persisted──▶ active ──end──▶ ending ──▶ ended
//!                                       │
//!                                       └─ spawns housekeeping thread:
//!                                          stale-lock sweep, then pruning
//! ```
//!
//! The coordinator never blocks on housekeeping. The sweep thread owns everything
//! it touches and reports only through logging.

mod coordinator;
mod repository;
mod sweep;

pub use coordinator::{
    ActiveSession, CoordinatorConfig, PersistMode, SessionCoordinator, StartOptions,
};
pub use repository::{MemorySessionRepository, SessionRepository};
pub use sweep::{end_stale_sessions, spawn_housekeeping, StaleSweepStats, RECENT_SESSIONS_LIMIT};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Retention thresholds for ended sessions. `None` disables a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub max_exited_sessions: Option<usize>,
    pub max_age: Option<Duration>,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        crate::config::SessionCleanupConfig::default().cleanup_policy()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    pub deleted_by_age: usize,
    pub deleted_by_count: usize,
    pub errors: Vec<String>,
}

impl PruneOutcome {
    pub fn total_deleted(&self) -> usize {
        self.deleted_by_age + self.deleted_by_count
    }
}

/// Deletes ended sessions older than the age threshold, then trims the rest to the
/// count threshold. A failed phase is logged and the next one still runs.
pub fn prune_exited_sessions(
    repo: &dyn SessionRepository,
    policy: &CleanupPolicy,
    now: DateTime<Utc>,
) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();

    if let Some(max_age) = policy.max_age {
        match repo.delete_exited_before(now - max_age) {
            Ok(deleted) => outcome.deleted_by_age = deleted,
            Err(err) => {
                warn!(error = %err, "Failed to prune ended sessions by age");
                outcome.errors.push(format!("age: {}", err));
            }
        }
    }

    if let Some(keep) = policy.max_exited_sessions {
        match repo.delete_oldest_exited(keep) {
            Ok(deleted) => outcome.deleted_by_count = deleted,
            Err(err) => {
                warn!(error = %err, "Failed to prune ended sessions by count");
                outcome.errors.push(format!("count: {}", err));
            }
        }
    }

    debug!(
        deleted_by_age = outcome.deleted_by_age,
        deleted_by_count = outcome.deleted_by_count,
        "Pruned ended sessions"
    );
    outcome
}
