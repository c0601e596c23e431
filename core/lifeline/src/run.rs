//! `lifeline run`: one tracked host session from bootstrap to clean end.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Args;
use lifeline_core::{
    CoordinatorConfig, LifelineConfig, LifelineError, MemorySessionRepository, PersistMode,
    SessionCoordinator, SessionId, SessionRepository, SessionType, StartOptions,
};
use lifeline_store::SqliteSessionRepository;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Use this session ID instead of generating one
    #[arg(long)]
    pub session_id: Option<SessionId>,

    /// Session type (browser or cli)
    #[arg(long, default_value = "browser")]
    session_type: String,

    /// Seconds to keep the session open before ending it
    #[arg(long, default_value_t = 0)]
    hold_secs: u64,

    /// Persist the session on a background thread after startup
    #[arg(long)]
    deferred: bool,

    /// Abort without ending the session, leaving it for the next run to recover
    #[arg(long)]
    abort: bool,
}

pub fn run(
    args: RunArgs,
    config: &LifelineConfig,
    lock_dir: PathBuf,
    session_id: SessionId,
) -> Result<(), LifelineError> {
    let session_type: SessionType = args.session_type.parse()?;

    let mut coordinator_config = CoordinatorConfig::new(lock_dir, session_type);
    coordinator_config.cleanup = config.session.cleanup_policy();
    let coordinator = SessionCoordinator::new(open_repository(config), coordinator_config);

    let persist = if args.deferred {
        PersistMode::Deferred
    } else {
        PersistMode::Eager
    };
    let session = coordinator.bootstrap(StartOptions {
        session_id: Some(session_id),
        persist,
    })?;
    let _entered = session.span().enter();
    info!(lock_dir = %session.lock_dir().display(), "Host session started");

    if args.deferred {
        match thread::spawn(session.deferred_persist()).join() {
            Ok(Ok(())) => debug!("Deferred persist finished"),
            Ok(Err(e)) => warn!(error = %e, "Deferred persist failed"),
            Err(_) => warn!("Deferred persist thread panicked"),
        }
    }

    if args.hold_secs > 0 {
        thread::sleep(Duration::from_secs(args.hold_secs));
    }

    if args.abort {
        warn!("Aborting without ending the session");
        std::process::abort();
    }

    session.end()
}

/// The requested session ID, validated, or a fresh one. The ID names the session log
/// file, so it is checked before anything touches the file system.
pub fn resolve_session_id(requested: Option<SessionId>) -> Result<SessionId, LifelineError> {
    let id = requested.unwrap_or_else(SessionId::generate);
    id.validate()?;
    Ok(id)
}

/// The SQLite repository, or an in-memory one when the database cannot be opened.
pub fn open_repository(config: &LifelineConfig) -> Arc<dyn SessionRepository> {
    let Some(path) = config.resolve_database_path() else {
        warn!("No database path available, session records will not outlive this run");
        return Arc::new(MemorySessionRepository::new());
    };

    match SqliteSessionRepository::new(&path) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to open session database, using in-memory records"
            );
            Arc::new(MemorySessionRepository::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_ids_are_validated_before_use() {
        assert!(matches!(
            resolve_session_id(Some(SessionId::new("../escape"))),
            Err(LifelineError::InvalidSession(_))
        ));
        assert!(matches!(
            resolve_session_id(Some(SessionId::new(""))),
            Err(LifelineError::MissingSessionId)
        ));
        assert_eq!(
            resolve_session_id(Some(SessionId::new("run-1"))).expect("valid id").as_str(),
            "run-1"
        );
    }

    #[test]
    fn generated_ids_are_valid() {
        let id = resolve_session_id(None).expect("generated id");
        assert!(id.validate().is_ok());
    }
}
