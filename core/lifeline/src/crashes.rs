//! `lifeline crashes`: browse unexpected close reports.

use std::path::Path;

use chrono::SecondsFormat;
use clap::Subcommand;
use lifeline_core::report::catalog::{
    issue_section, load_crash_reports, resolve_crash_report, CrashReportEntry,
};
use lifeline_core::report::crash_reports_dir;
use lifeline_core::LifelineError;

#[derive(Subcommand)]
pub enum CrashesCommand {
    /// Print a report's Markdown
    Show {
        /// Report ID, unique part of one, or `latest`
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Print only the pre-filled issue body of a report
    Issue {
        /// Report ID, unique part of one, or `latest`
        #[arg(value_name = "ID")]
        id: String,
    },
}

pub fn run(lock_dir: &Path, action: Option<CrashesCommand>) -> Result<(), LifelineError> {
    let reports_dir = crash_reports_dir(lock_dir);
    match action {
        None => list(&reports_dir),
        Some(CrashesCommand::Show { id }) => {
            if let Some(report) = find(&reports_dir, &id)? {
                print!("{}", report.read_markdown()?);
            }
            Ok(())
        }
        Some(CrashesCommand::Issue { id }) => {
            if let Some(report) = find(&reports_dir, &id)? {
                print!("{}", issue_section(&report.read_markdown()?));
            }
            Ok(())
        }
    }
}

fn list(reports_dir: &Path) -> Result<(), LifelineError> {
    let reports = load_crash_reports(reports_dir)?;
    if reports.is_empty() {
        println!("No crash reports in {}", reports_dir.display());
        return Ok(());
    }

    println!("{:<28} {:<21} {:<31} REASON", "ID", "GENERATED", "CLASS");
    for report in &reports {
        println!("{}", list_line(report));
    }
    Ok(())
}

fn list_line(report: &CrashReportEntry) -> String {
    let generated = report
        .generated_at()
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<28} {:<21} {:<31} {}",
        report.short_id(),
        generated,
        report.summary.classification.class,
        report.summary.classification.reason
    )
}

/// A missing report is not a failure: say so and return `None`.
fn find(reports_dir: &Path, query: &str) -> Result<Option<CrashReportEntry>, LifelineError> {
    match resolve_crash_report(reports_dir, query) {
        Ok(report) => Ok(Some(report)),
        Err(LifelineError::ReportNotFound(query)) => {
            eprintln!(
                "No crash report matches {:?} in {}",
                query,
                reports_dir.display()
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::report::catalog::{ClassificationSummary, CrashReportSummary};
    use std::path::PathBuf;

    #[test]
    fn list_line_shows_id_time_and_class() {
        let entry = CrashReportEntry {
            json_path: PathBuf::from("/tmp/crashes/session_01abc.crash.json"),
            markdown_path: PathBuf::from("/tmp/crashes/session_01abc.crash.md"),
            summary: CrashReportSummary {
                session_id: "01abc".to_string(),
                generated_at: "2026-02-08T10:05:00.123Z".to_string(),
                classification: ClassificationSummary {
                    class: "main_process_crash_or_abrupt".to_string(),
                    reason: "abrupt marker present and no shutdown marker".to_string(),
                },
            },
        };
        let line = list_line(&entry);
        assert!(line.starts_with("01abc "));
        assert!(line.contains("2026-02-08T10:05:00Z"));
        assert!(line.contains("main_process_crash_or_abrupt"));
    }

    #[test]
    fn unknown_report_is_not_an_error() {
        let temp = tempfile::tempdir().expect("temp dir");
        assert!(find(temp.path(), "latest").expect("find").is_none());
    }
}
