//! # lifeline-core
//!
//! Session lifecycle, liveness tracking, and crash attribution for a desktop host
//! process.
//!
//! Every run leaves small artifacts in a shared lock directory: marker files that
//! record startup and clean shutdown, and an advisory-locked file held for the life
//! of the session. The next run reads them to tell a clean exit from a crash or an
//! external kill, and writes a redacted report for anything that did not end cleanly.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Background housekeeping runs on a detached
//!   `std::thread`.
//! - **Retrospective**: Nothing is detected at crash time. Classification is a pure
//!   function of what is on disk when the next process looks.
//! - **Best effort at the edges**: Marker, lock, and report failures are logged and
//!   never stop a session from starting or ending.
//! - **No global state**: Everything is keyed by an injected lock directory.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lifeline_core::{
//!     CoordinatorConfig, MemorySessionRepository, SessionCoordinator, SessionType,
//!     StartOptions,
//! };
//!
//! let repo = Arc::new(MemorySessionRepository::new());
//! let coordinator = SessionCoordinator::new(
//!     repo,
//!     CoordinatorConfig::new("/tmp/lifeline", SessionType::Browser),
//! );
//! let session = coordinator.bootstrap(StartOptions::default())?;
//! // ... run the application ...
//! session.end()?;
//! ```

// Public modules
pub mod classify;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod markers;
pub mod report;
pub mod types;

mod fsutil;

// Re-export commonly used items at crate root
pub use classify::{
    build_exit_report, classify_session_exit, classify_with_liveness, ExitClass,
    ExitClassification, Inference,
};
pub use config::{load_config, LifelineConfig, SessionCleanupConfig};
pub use error::{LifelineError, RepositoryError, Result};
pub use lifecycle::{
    end_stale_sessions, prune_exited_sessions, ActiveSession, CleanupPolicy,
    CoordinatorConfig, MemorySessionRepository, PersistMode, PruneOutcome, SessionCoordinator,
    SessionRepository, StaleSweepStats, StartOptions,
};
pub use lock::{lock_session, probe_session_lock, LockProbe, SessionLock};
pub use markers::{mark_abrupt_exits, write_shutdown_marker, write_startup_marker, MarkerKind};
pub use report::{write_unexpected_close_report, CrashReporter, UnexpectedCloseReport};
pub use types::{Session, SessionId, SessionType};
