//! Session record types shared with the repository layer.
//!
//! The repository owns persistence of [`Session`]; this crate only creates,
//! validates, and references records by [`SessionId`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LifelineError;

/// Opaque session identifier. Appears verbatim in marker and lock file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// Generates a fresh, lowercase ULID-based ID.
    pub fn generate() -> Self {
        SessionId(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IDs must be non-empty and file-name safe: ASCII alphanumerics, `-`, `_`.
    pub fn validate(&self) -> Result<(), LifelineError> {
        if self.0.is_empty() {
            return Err(LifelineError::MissingSessionId);
        }
        if !self
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(LifelineError::InvalidSession(format!(
                "session id {:?} contains characters outside [A-Za-z0-9_-]",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Browser,
    Cli,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Browser => "browser",
            SessionType::Cli => "cli",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = LifelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(SessionType::Browser),
            "cli" => Ok(SessionType::Cli),
            other => Err(LifelineError::InvalidSession(format!(
                "unknown session type {:?}",
                other
            ))),
        }
    }
}

/// A host process session. Active while `ended_at` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub session_type: SessionType,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, session_type: SessionType, started_at: DateTime<Utc>) -> Self {
        Session {
            id,
            session_type,
            started_at,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn validate(&self) -> Result<(), LifelineError> {
        self.id.validate()?;
        if let Some(ended_at) = self.ended_at {
            if ended_at < self.started_at {
                return Err(LifelineError::InvalidSession(format!(
                    "session {} ends before it starts",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert!(a.validate().is_ok());
        assert_ne!(a, b);
        assert_eq!(a.as_str(), a.as_str().to_lowercase());
    }

    #[test]
    fn rejects_empty_and_unsafe_ids() {
        assert!(matches!(
            SessionId::new("").validate(),
            Err(LifelineError::MissingSessionId)
        ));
        assert!(SessionId::new("../etc").validate().is_err());
        assert!(SessionId::new("a.startup").validate().is_err());
        assert!(SessionId::new("abc-123_DEF").validate().is_ok());
    }

    #[test]
    fn session_type_round_trips_through_str() {
        for ty in [SessionType::Browser, SessionType::Cli] {
            assert_eq!(ty.as_str().parse::<SessionType>().unwrap(), ty);
        }
        assert!("desktop".parse::<SessionType>().is_err());
    }

    #[test]
    fn session_without_end_is_active() {
        let now = Utc::now();
        let mut session = Session::new(SessionId::new("s1"), SessionType::Browser, now);
        assert!(session.is_active());
        session.ended_at = Some(now);
        assert!(!session.is_active());
        assert!(session.validate().is_ok());
    }
}
