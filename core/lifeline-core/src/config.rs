//! Configuration loading and default paths.
//!
//! ```toml
//! lock_dir = "/var/tmp/lifeline"        # optional
//! database_path = "/tmp/sessions.db"    # optional
//!
//! [session]
//! max_exited_sessions = 50              # -1 keeps every ended session
//! max_exited_session_age_days = 7       # 0 disables age-based pruning
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LifelineError, Result};
use crate::lifecycle::CleanupPolicy;

const APP_DIR: &str = "lifeline";

pub const DEFAULT_MAX_EXITED_SESSIONS: i64 = 50;
pub const DEFAULT_MAX_EXITED_SESSION_AGE_DAYS: u32 = 7;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct LifelineConfig {
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub session: SessionCleanupConfig,
}

/// Retention thresholds for ended session records.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SessionCleanupConfig {
    #[serde(default = "default_max_exited_sessions")]
    pub max_exited_sessions: i64,
    #[serde(default = "default_max_exited_session_age_days")]
    pub max_exited_session_age_days: u32,
}

fn default_max_exited_sessions() -> i64 {
    DEFAULT_MAX_EXITED_SESSIONS
}

fn default_max_exited_session_age_days() -> u32 {
    DEFAULT_MAX_EXITED_SESSION_AGE_DAYS
}

impl Default for SessionCleanupConfig {
    fn default() -> Self {
        Self {
            max_exited_sessions: DEFAULT_MAX_EXITED_SESSIONS,
            max_exited_session_age_days: DEFAULT_MAX_EXITED_SESSION_AGE_DAYS,
        }
    }
}

impl SessionCleanupConfig {
    pub fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy {
            max_exited_sessions: usize::try_from(self.max_exited_sessions).ok(),
            max_age: (self.max_exited_session_age_days > 0)
                .then(|| chrono::Duration::days(i64::from(self.max_exited_session_age_days))),
        }
    }
}

impl LifelineConfig {
    /// Configured lock directory, or the platform default.
    pub fn resolve_lock_dir(&self) -> Option<PathBuf> {
        self.lock_dir.clone().or_else(default_lock_dir)
    }

    pub fn resolve_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(default_database_path)
    }
}

/// `$XDG_STATE_HOME/lifeline/logs`, falling back to `~/.local/state/lifeline/logs`.
pub fn default_lock_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .map(|state| state.join(APP_DIR).join("logs"))
}

pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|data| data.join(APP_DIR).join("sessions.db"))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_DIR).join("config.toml"))
}

/// Loads configuration from `path` (or the default location).
///
/// A missing file yields defaults. A file that exists but does not parse is an error.
pub fn load_config(path: Option<PathBuf>) -> Result<LifelineConfig> {
    let Some(config_path) = path.or_else(default_config_path) else {
        return Ok(LifelineConfig::default());
    };
    load_config_file(&config_path)
}

fn load_config_file(path: &Path) -> Result<LifelineConfig> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LifelineConfig::default())
        }
        Err(err) => return Err(LifelineError::io("read config", err)),
    };
    toml::from_str::<LifelineConfig>(&content).map_err(|err| LifelineError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
