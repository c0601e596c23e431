//! `lifeline sessions`: recent records from the session database.

use lifeline_core::{LifelineConfig, LifelineError, SessionRepository};
use lifeline_store::SqliteSessionRepository;

pub fn run(config: &LifelineConfig, limit: usize) -> Result<(), LifelineError> {
    let Some(path) = config.resolve_database_path() else {
        eprintln!("No session database configured.");
        return Ok(());
    };
    if !path.exists() {
        eprintln!("No session database at {}", path.display());
        return Ok(());
    }

    let repo = SqliteSessionRepository::new(&path)?;
    let sessions = repo.recent_sessions(limit)?;
    if sessions.is_empty() {
        println!("No sessions recorded.");
        return Ok(());
    }

    println!("{:<28} {:<8} {:<26} ENDED", "SESSION", "TYPE", "STARTED");
    for session in sessions {
        let ended = session
            .ended_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "(active)".to_string());
        println!(
            "{:<28} {:<8} {:<26} {}",
            session.id,
            session.session_type,
            session.started_at.to_rfc3339(),
            ended
        );
    }
    Ok(())
}
