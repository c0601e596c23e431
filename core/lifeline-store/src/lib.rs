//! SQLite session repository for lifeline.
//!
//! One small table of session records. Timestamps are stored as fixed-width
//! RFC 3339 strings (nanosecond precision, `Z` suffix) so string comparison in SQL
//! is chronological.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use lifeline_core::{RepositoryError, Session, SessionId, SessionRepository, SessionType};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::debug;

pub struct SqliteSessionRepository {
    path: PathBuf,
}

impl SqliteSessionRepository {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let repo = Self { path: path.into() };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, type, started_at, ended_at FROM sessions WHERE id = ?1",
                params![id.as_str()],
                read_row,
            )
            .optional()
            .map_err(|err| RepositoryError::backend("Failed to query session", err))?
            .map(session_from_row)
            .transpose()
        })
    }

    fn init_schema(&self) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    type TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
                 CREATE INDEX IF NOT EXISTS idx_sessions_ended_at ON sessions(ended_at);
                 COMMIT;",
            )
            .map_err(|err| RepositoryError::backend("Failed to initialize schema", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, RepositoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| RepositoryError::backend("Failed to create database dir", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| RepositoryError::backend("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| RepositoryError::backend("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| RepositoryError::backend("Failed to set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| RepositoryError::backend("Failed to set busy_timeout", err))?;

        Ok(conn)
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        session
            .validate()
            .map_err(|err| RepositoryError::InvalidRecord(err.to_string()))?;
        debug!(session_id = %session.id, session_type = %session.session_type, "Saving session");

        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, type, started_at, ended_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(id) DO UPDATE SET \
                    type = excluded.type, \
                    started_at = excluded.started_at, \
                    ended_at = excluded.ended_at",
                params![
                    session.id.as_str(),
                    session.session_type.as_str(),
                    format_time(session.started_at),
                    session.ended_at.map(format_time)
                ],
            )
            .map_err(|err| RepositoryError::backend("Failed to insert session", err))?;
            Ok(())
        })
    }

    fn end_session(&self, id: &SessionId, ended_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
                    params![format_time(ended_at), id.as_str()],
                )
                .map_err(|err| RepositoryError::backend("Failed to end session", err))?;
            if updated > 0 {
                return Ok(());
            }

            // Nothing updated: either already ended (fine) or unknown.
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sessions WHERE id = ?1",
                    params![id.as_str()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|err| RepositoryError::backend("Failed to query session", err))?
                .is_some();
            if exists {
                Ok(())
            } else {
                Err(RepositoryError::NotFound(id.to_string()))
            }
        })
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, type, started_at, ended_at FROM sessions \
                     ORDER BY started_at DESC, id ASC LIMIT ?1",
                )
                .map_err(|err| RepositoryError::backend("Failed to prepare sessions query", err))?;

            let rows = stmt
                .query_map(params![limit], read_row)
                .map_err(|err| RepositoryError::backend("Failed to read session rows", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                let row =
                    row.map_err(|err| RepositoryError::backend("Failed to decode session row", err))?;
                sessions.push(session_from_row(row)?);
            }
            Ok(sessions)
        })
    }

    fn delete_exited_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let deleted = self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE ended_at IS NOT NULL AND ended_at < ?1",
                params![format_time(cutoff)],
            )
            .map_err(|err| RepositoryError::backend("Failed to delete exited sessions", err))
        })?;
        if deleted > 0 {
            debug!(deleted, cutoff = %cutoff, "Deleted exited sessions before cutoff");
        }
        Ok(deleted)
    }

    fn delete_oldest_exited(&self, keep: usize) -> Result<usize, RepositoryError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let deleted = self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE id IN ( \
                    SELECT id FROM sessions WHERE ended_at IS NOT NULL \
                    ORDER BY ended_at DESC, id ASC LIMIT -1 OFFSET ?1 \
                 )",
                params![keep],
            )
            .map_err(|err| RepositoryError::backend("Failed to delete oldest exited sessions", err))
        })?;
        if deleted > 0 {
            debug!(deleted, keep, "Deleted oldest exited sessions");
        }
        Ok(deleted)
    }
}

type SessionRow = (String, String, String, Option<String>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn session_from_row((id, session_type, started_at, ended_at): SessionRow) -> Result<Session, RepositoryError> {
    let session_type: SessionType = session_type
        .parse()
        .map_err(|err: lifeline_core::LifelineError| RepositoryError::InvalidRecord(err.to_string()))?;
    let started_at = parse_time(&started_at)
        .ok_or_else(|| RepositoryError::InvalidRecord(format!("bad started_at for {}", id)))?;
    let ended_at = match ended_at {
        Some(value) => Some(
            parse_time(&value)
                .ok_or_else(|| RepositoryError::InvalidRecord(format!("bad ended_at for {}", id)))?,
        ),
        None => None,
    };

    Ok(Session {
        id: SessionId::new(id),
        session_type,
        started_at,
        ended_at,
    })
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn repo() -> (tempfile::TempDir, SqliteSessionRepository) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let repo = SqliteSessionRepository::new(temp_dir.path().join("data").join("sessions.db"))
            .expect("open repo");
        (temp_dir, repo)
    }

    fn session(id: &str, started: i64, ended: Option<i64>) -> Session {
        let mut session = Session::new(SessionId::new(id), SessionType::Browser, t(started));
        session.ended_at = ended.map(t);
        session
    }

    #[test]
    fn save_and_find_round_trip() {
        let (_temp, repo) = repo();
        let mut saved = session("a", 0, None);
        saved.started_at = saved.started_at + Duration::nanoseconds(123);
        repo.save(&saved).expect("save");

        let found = repo.find_by_id(&SessionId::new("a")).expect("find");
        assert_eq!(found, Some(saved));
        assert_eq!(repo.find_by_id(&SessionId::new("missing")).expect("find"), None);
    }

    #[test]
    fn end_session_is_idempotent() {
        let (_temp, repo) = repo();
        repo.save(&session("a", 0, None)).expect("save");
        repo.end_session(&SessionId::new("a"), t(5)).expect("end");
        repo.end_session(&SessionId::new("a"), t(9)).expect("end again");

        let found = repo.find_by_id(&SessionId::new("a")).expect("find").expect("row");
        assert_eq!(found.ended_at, Some(t(5)));
        assert!(matches!(
            repo.end_session(&SessionId::new("ghost"), t(1)),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn recent_sessions_newest_first_with_limit() {
        let (_temp, repo) = repo();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            repo.save(&session(id, i as i64, None)).expect("save");
        }
        let ids: Vec<String> = repo
            .recent_sessions(2)
            .expect("recent")
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn prunes_exited_sessions_by_age_and_count() {
        let (_temp, repo) = repo();
        repo.save(&session("old", 0, Some(1))).expect("save");
        repo.save(&session("mid", 2, Some(3))).expect("save");
        repo.save(&session("new", 4, Some(5))).expect("save");
        repo.save(&session("live", 0, None)).expect("save");

        assert_eq!(repo.delete_exited_before(t(2)).expect("by age"), 1);
        assert_eq!(repo.delete_oldest_exited(1).expect("by count"), 1);

        let mut ids: Vec<String> = repo
            .recent_sessions(10)
            .expect("recent")
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["live", "new"]);
    }

    #[test]
    fn rejects_invalid_sessions() {
        let (_temp, repo) = repo();
        assert!(matches!(
            repo.save(&session("bad id", 0, None)),
            Err(RepositoryError::InvalidRecord(_))
        ));
    }

    #[test]
    fn reopening_keeps_data() {
        let (temp, repo) = repo();
        repo.save(&session("a", 0, None)).expect("save");
        drop(repo);

        let reopened = SqliteSessionRepository::new(temp.path().join("data").join("sessions.db"))
            .expect("reopen");
        assert!(reopened.find_by_id(&SessionId::new("a")).expect("find").is_some());
    }
}
