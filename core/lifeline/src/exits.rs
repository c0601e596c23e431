//! `lifeline exits`: how every session in the lock directory ended.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use lifeline_core::{build_exit_report, ExitClassification, LifelineError};

pub fn run(lock_dir: &Path, json: bool) -> Result<(), LifelineError> {
    let report = build_exit_report(lock_dir)?;

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|err| LifelineError::json("serialize exit report", err))?;
        println!("{}", out);
        return Ok(());
    }

    if report.is_empty() {
        println!("No sessions found in {}", lock_dir.display());
        return Ok(());
    }

    println!(
        "{:<28} {:<31} {:<17} {:<21} REASON",
        "SESSION", "CLASS", "INFERENCE", "LAST MARKER"
    );
    for row in &report {
        println!(
            "{:<28} {:<31} {:<17} {:<21} {}",
            row.session_id,
            row.class.as_str(),
            row.inference.as_str(),
            format_time(row.last_marker_observed),
            reason(row)
        );
    }
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

fn reason(row: &ExitClassification) -> String {
    match row.owner_alive {
        Some(true) => format!("{} (still running)", row.reason),
        Some(false) => format!("{} (owner gone)", row.reason),
        None => row.reason.clone(),
    }
}
