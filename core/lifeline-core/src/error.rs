//! Error types for lifeline-core operations.

use std::path::PathBuf;
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// Repository Error (returned by SessionRepository implementations)
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by a [`crate::lifecycle::SessionRepository`] backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid session record: {0}")]
    InvalidRecord(String),

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RepositoryError {
    pub fn backend(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        RepositoryError::Backend {
            context: context.into(),
            source: source.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Library Error
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur in lifeline-core operations.
#[derive(Debug, thiserror::Error)]
pub enum LifelineError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Lock directory is required")]
    MissingLockDir,

    #[error("Session ID is required")]
    MissingSessionId,

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Lock Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Session lock already held: {0}")]
    LockHeld(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    /// The first persist attempt failed. The source is shared because the
    /// outcome is cached and handed to every later caller.
    #[error("Failed to save session {session_id}: {source}")]
    Persist {
        session_id: String,
        #[source]
        source: Arc<RepositoryError>,
    },

    #[error("Session repository error: {0}")]
    Repository(#[from] RepositoryError),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Crash Report Catalog Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No crash report matching '{0}' found")]
    ReportNotFound(String),

    #[error("Multiple crash reports match '{query}': {candidates}")]
    AmbiguousReport { query: String, candidates: String },
}

impl LifelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LifelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        LifelineError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using LifelineError.
pub type Result<T> = std::result::Result<T, LifelineError>;
