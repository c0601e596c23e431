//! Session log naming and the per-session tracing span.
//!
//! The host writes its log for a session to `session_<ID>.log` in the lock
//! directory. The crash reporter of a later run finds it there by name.

use std::path::{Path, PathBuf};

use tracing::Span;

use crate::types::Session;

pub fn session_log_file_name(session_id: &str) -> String {
    format!("session_{}.log", session_id)
}

pub fn session_log_path(lock_dir: &Path, session_id: &str) -> PathBuf {
    lock_dir.join(session_log_file_name(session_id))
}

/// Span carrying `session_id` and `session_type` for every event logged on behalf
/// of `session`.
pub fn session_span(session: &Session) -> Span {
    tracing::info_span!(
        "session",
        session_id = %session.id,
        session_type = %session.session_type
    )
}
