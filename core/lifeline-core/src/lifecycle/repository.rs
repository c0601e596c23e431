//! The session repository seam and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::types::{Session, SessionId};

/// Persistence of session records. Implementations must make `end_session`
/// idempotent: ending an already ended session keeps the first `ended_at`.
pub trait SessionRepository: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    fn end_session(&self, id: &SessionId, ended_at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Most recently started sessions first, at most `limit` of them.
    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>, RepositoryError>;

    /// Deletes ended sessions whose `ended_at` is before `cutoff`. Returns the count.
    fn delete_exited_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;

    /// Deletes ended sessions beyond the newest `keep`. Returns the count.
    fn delete_oldest_exited(&self, keep: usize) -> Result<usize, RepositoryError>;
}

/// Session records held in process memory.
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.table().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    // A panic while holding the guard leaves the map consistent: every mutation is a
    // single insert or retain.
    fn table(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRepository for MemorySessionRepository {
    fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        session
            .validate()
            .map_err(|err| RepositoryError::InvalidRecord(err.to_string()))?;
        self.table().insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn end_session(&self, id: &SessionId, ended_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut table = self.table();
        let session = table
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if session.ended_at.is_none() {
            session.ended_at = Some(ended_at);
        }
        Ok(())
    }

    fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>, RepositoryError> {
        let mut sessions: Vec<Session> = self.table().values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn delete_exited_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, session| session.ended_at.map_or(true, |ended| ended >= cutoff));
        Ok(before - table.len())
    }

    fn delete_oldest_exited(&self, keep: usize) -> Result<usize, RepositoryError> {
        let mut table = self.table();
        let mut ended: Vec<(DateTime<Utc>, SessionId)> = table
            .values()
            .filter_map(|session| session.ended_at.map(|at| (at, session.id.clone())))
            .collect();
        ended.sort_by(|a, b| b.cmp(a));

        let doomed: Vec<SessionId> = ended.into_iter().skip(keep).map(|(_, id)| id).collect();
        for id in &doomed {
            table.remove(id);
        }
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionType;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn session(id: &str, started: i64, ended: Option<i64>) -> Session {
        let mut session = Session::new(SessionId::new(id), SessionType::Browser, t(started));
        session.ended_at = ended.map(t);
        session
    }

    #[test]
    fn end_session_keeps_first_end_time() {
        let repo = MemorySessionRepository::new();
        repo.save(&session("a", 0, None)).unwrap();
        repo.end_session(&SessionId::new("a"), t(5)).unwrap();
        repo.end_session(&SessionId::new("a"), t(9)).unwrap();
        assert_eq!(repo.get(&SessionId::new("a")).unwrap().ended_at, Some(t(5)));
    }

    #[test]
    fn end_unknown_session_is_not_found() {
        let repo = MemorySessionRepository::new();
        assert!(matches!(
            repo.end_session(&SessionId::new("nope"), t(0)),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn save_rejects_invalid_records() {
        let repo = MemorySessionRepository::new();
        assert!(matches!(
            repo.save(&session("", 0, None)),
            Err(RepositoryError::InvalidRecord(_))
        ));
        assert!(repo.is_empty());
    }

    #[test]
    fn recent_sessions_are_newest_first_and_bounded() {
        let repo = MemorySessionRepository::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            repo.save(&session(id, i as i64, None)).unwrap();
        }
        let recent = repo.recent_sessions(2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn deletes_only_ended_sessions() {
        let repo = MemorySessionRepository::new();
        repo.save(&session("old", 0, Some(1))).unwrap();
        repo.save(&session("mid", 2, Some(3))).unwrap();
        repo.save(&session("new", 4, Some(5))).unwrap();
        repo.save(&session("live", 0, None)).unwrap();

        assert_eq!(repo.delete_exited_before(t(2)).unwrap(), 1);
        assert_eq!(repo.delete_oldest_exited(1).unwrap(), 1);
        assert!(repo.get(&SessionId::new("new")).is_some());
        assert!(repo.get(&SessionId::new("live")).is_some());
        assert_eq!(repo.len(), 2);
    }
}
