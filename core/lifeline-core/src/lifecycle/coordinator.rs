use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn, Span};

use super::sweep::spawn_housekeeping;
use super::{CleanupPolicy, SessionRepository};
use crate::error::{LifelineError, RepositoryError, Result};
use crate::lock::{held_session_ids, lock_session, SessionLock};
use crate::logging::session_span;
use crate::markers::{mark_abrupt_exits, write_shutdown_marker, write_startup_marker};
use crate::report::CrashReporter;
use crate::types::{Session, SessionId, SessionType};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Shared directory for markers, lock files, session logs, and crash reports.
    pub lock_dir: PathBuf,
    pub session_type: SessionType,
    pub cleanup: CleanupPolicy,
}

impl CoordinatorConfig {
    pub fn new(lock_dir: impl Into<PathBuf>, session_type: SessionType) -> Self {
        CoordinatorConfig {
            lock_dir: lock_dir.into(),
            session_type,
            cleanup: CleanupPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistMode {
    /// `start` saves the session before returning.
    #[default]
    Eager,
    /// The caller persists later through [`ActiveSession::deferred_persist`].
    Deferred,
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Use this ID instead of generating one.
    pub session_id: Option<SessionId>,
    pub persist: PersistMode,
}

/// Creates sessions and recovers from the ones previous runs left behind.
pub struct SessionCoordinator {
    repo: Arc<dyn SessionRepository>,
    config: CoordinatorConfig,
    reporter: CrashReporter,
}

impl SessionCoordinator {
    pub fn new(repo: Arc<dyn SessionRepository>, config: CoordinatorConfig) -> Self {
        SessionCoordinator {
            repo,
            config,
            reporter: CrashReporter::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: CrashReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Marks every session that never shut down and whose lock is not held, then
    /// writes a crash report for each. Returns the newly marked IDs.
    ///
    /// Nothing here can fail startup. Errors are logged and skipped.
    pub fn recover_abrupt_exits(&self, detected_at: DateTime<Utc>) -> Vec<String> {
        let lock_dir = &self.config.lock_dir;

        // Without the held set a running sibling looks dead, so skip marking entirely.
        let running = match held_session_ids(lock_dir) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "Failed to list held session locks, skipping abrupt-exit recovery");
                return Vec::new();
            }
        };

        let marked = match mark_abrupt_exits(lock_dir, detected_at, &running) {
            Ok(marked) => marked,
            Err(err) => {
                warn!(error = %err, "Failed to mark abrupt exits");
                return Vec::new();
            }
        };

        for session_id in &marked {
            match self.reporter.write(lock_dir, session_id) {
                Ok(Some(path)) => {
                    info!(session_id = %session_id, path = %path.display(), "Recorded unexpected close")
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, session_id = %session_id, "Failed to write unexpected close report")
                }
            }
        }
        if !marked.is_empty() {
            info!(count = marked.len(), "Detected sessions that ended abruptly");
        }
        marked
    }

    /// Creates and validates a new session. With [`PersistMode::Eager`] it is also
    /// saved before this returns.
    pub fn start(&self, options: StartOptions) -> Result<ActiveSession> {
        let id = options.session_id.unwrap_or_else(SessionId::generate);
        let session = Session::new(id, self.config.session_type, Utc::now());
        session.validate()?;
        if self.config.lock_dir.as_os_str().is_empty() {
            return Err(LifelineError::MissingLockDir);
        }

        let span = session_span(&session);
        span.in_scope(|| debug!("Session created"));

        let active = ActiveSession {
            inner: Arc::new(SessionState {
                session,
                span,
                repo: Arc::clone(&self.repo),
                lock_dir: self.config.lock_dir.clone(),
                cleanup: self.config.cleanup,
                persisted: OnceCell::new(),
                lock: Mutex::new(None),
                housekeeping: Mutex::new(None),
                ended: AtomicBool::new(false),
            }),
        };

        if options.persist == PersistMode::Eager {
            active.ensure_persisted()?;
        }
        Ok(active)
    }

    /// Abrupt-exit recovery followed by [`SessionCoordinator::start`].
    pub fn bootstrap(&self, options: StartOptions) -> Result<ActiveSession> {
        self.recover_abrupt_exits(Utc::now());
        self.start(options)
    }
}

/// A session owned by this process. Cloning shares the same session.
#[derive(Clone)]
pub struct ActiveSession {
    inner: Arc<SessionState>,
}

struct SessionState {
    session: Session,
    span: Span,
    repo: Arc<dyn SessionRepository>,
    lock_dir: PathBuf,
    cleanup: CleanupPolicy,
    /// First persist outcome, shared with every later caller.
    persisted: OnceCell<std::result::Result<(), Arc<RepositoryError>>>,
    lock: Mutex<Option<SessionLock>>,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
    ended: AtomicBool,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("session", &self.inner.session)
            .field("persisted", &self.inner.persisted.get().map(|r| r.is_ok()))
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

impl ActiveSession {
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.session.id
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn lock_dir(&self) -> &Path {
        &self.inner.lock_dir
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// True while this process holds the session lock.
    pub fn holds_lock(&self) -> bool {
        guard(&self.inner.lock).is_some()
    }

    /// Saves the session, exactly once. Every call returns the first call's outcome,
    /// including its error; a failed save is never retried.
    ///
    /// Concurrent callers block until the first attempt finishes.
    pub fn ensure_persisted(&self) -> Result<()> {
        self.inner
            .persisted
            .get_or_init(|| self.inner.persist())
            .clone()
            .map_err(|source| LifelineError::Persist {
                session_id: self.inner.session.id.to_string(),
                source,
            })
    }

    /// A callable that persists the session when invoked, e.g. after first paint.
    pub fn deferred_persist(&self) -> impl FnOnce() -> Result<()> + Send + 'static {
        let session = self.clone();
        move || session.ensure_persisted()
    }

    /// Ends the session: records `ended_at`, writes the shutdown marker, and releases
    /// the session lock.
    ///
    /// Safe to call repeatedly. Later calls only repeat the repository update, which
    /// the repository treats as a no-op.
    ///
    /// The process did exit cleanly even when the repository update fails, so the
    /// marker and lock are handled first and the repository error is returned last.
    pub fn end(&self) -> Result<()> {
        self.ensure_persisted()?;

        let state = &self.inner;
        let _entered = state.span.enter();
        let now = Utc::now();

        let ended = state.repo.end_session(&state.session.id, now);
        if let Err(err) = &ended {
            warn!(error = %err, "Failed to record session end");
        }

        if !state.ended.swap(true, Ordering::SeqCst) {
            if let Err(err) = write_shutdown_marker(&state.lock_dir, state.session.id.as_str(), now)
            {
                warn!(error = %err, "Failed to write shutdown marker");
            }
            if let Some(lock) = guard(&state.lock).take() {
                if let Err(err) = lock.release() {
                    warn!(error = %err, "Failed to release session lock");
                }
            }
            info!("Session ended");
        }

        ended.map_err(LifelineError::from)
    }

    /// Waits for the housekeeping thread started by the first persist, if any.
    /// Returns false if the thread panicked.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn join_housekeeping(&self) -> bool {
        match guard(&self.inner.housekeeping).take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl SessionState {
    fn persist(&self) -> std::result::Result<(), Arc<RepositoryError>> {
        let _entered = self.span.enter();
        let id = self.session.id.as_str();

        if let Err(err) = self.repo.save(&self.session) {
            warn!(error = %err, "Failed to save session");
            return Err(Arc::new(err));
        }

        // Lock before the startup marker: a sibling's recovery must never see a
        // startup-only session whose lock is not held.
        match acquire_session_lock(&self.lock_dir, id) {
            Some(lock) => match write_startup_marker(&self.lock_dir, id, self.session.started_at) {
                Ok(()) => *guard(&self.lock) = Some(lock),
                Err(err) => {
                    warn!(error = %err, "Failed to write startup marker");
                    if let Err(err) = lock.release() {
                        warn!(error = %err, "Failed to release session lock");
                    }
                }
            },
            None => warn!("Session lock unavailable, skipping startup marker"),
        }

        let handle = spawn_housekeeping(
            Arc::clone(&self.repo),
            self.lock_dir.clone(),
            self.session.session_type,
            self.session.id.clone(),
            self.cleanup,
            self.span.clone(),
        );
        *guard(&self.housekeeping) = Some(handle);

        info!("Session persisted");
        Ok(())
    }
}

const LOCK_ATTEMPTS: u32 = 3;
const LOCK_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(20);

/// Takes the session lock, retrying briefly on contention: a sibling's liveness probe
/// holds a fresh lock file only for the duration of its check.
fn acquire_session_lock(lock_dir: &Path, session_id: &str) -> Option<SessionLock> {
    for attempt in 1..=LOCK_ATTEMPTS {
        match lock_session(lock_dir, session_id) {
            Ok(lock) => return Some(lock),
            Err(LifelineError::LockHeld(_)) if attempt < LOCK_ATTEMPTS => {
                std::thread::sleep(LOCK_RETRY_DELAY)
            }
            Err(err) => {
                warn!(error = %err, "Failed to acquire session lock");
                return None;
            }
        }
    }
    None
}

// Every critical section is a single Option assignment or take.
fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
