//! Listing and lookup of written crash reports.
//!
//! Reports are read leniently: only the summary fields are required, and files that
//! cannot be read or parsed are skipped rather than failing the listing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Deserialize;

use super::markdown::ISSUE_TEMPLATE_HEADING;
use super::{markdown_sibling, JSON_SUFFIX};
use crate::error::{LifelineError, Result};
use crate::fsutil::parse_timestamp;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CrashReportSummary {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub classification: ClassificationSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClassificationSummary {
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReportEntry {
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
    pub summary: CrashReportSummary,
}

impl CrashReportEntry {
    /// `<ID>` from `session_<ID>.crash.json`.
    pub fn short_id(&self) -> &str {
        short_crash_id(&self.json_path)
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.summary.generated_at)
    }

    pub fn read_markdown(&self) -> Result<String> {
        fs::read_to_string(&self.markdown_path)
            .map_err(|err| LifelineError::io("read crash report markdown", err))
    }
}

fn short_crash_id(path: &Path) -> &str {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    let name = name.strip_suffix(JSON_SUFFIX).unwrap_or(name);
    name.strip_prefix("session_").unwrap_or(name)
}

/// Every report in `reports_dir`, newest `generated_at` first.
///
/// Reports with an unparseable timestamp sort after dated ones, by path descending.
pub fn load_crash_reports(reports_dir: &Path) -> Result<Vec<CrashReportEntry>> {
    let entries = match fs::read_dir(reports_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LifelineError::io("read crash reports directory", err)),
    };

    let mut reports = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_report = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(JSON_SUFFIX));
        if !is_report {
            continue;
        }
        let Ok(raw) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(summary) = serde_json::from_str::<CrashReportSummary>(&raw) else {
            continue;
        };
        reports.push(CrashReportEntry {
            markdown_path: markdown_sibling(&path),
            json_path: path,
            summary,
        });
    }

    reports.sort_by(|a, b| {
        b.generated_at()
            .cmp(&a.generated_at())
            .then_with(|| b.json_path.cmp(&a.json_path))
    });
    Ok(reports)
}

/// Finds one report by `latest`, exact short ID, or a unique substring of the file
/// name or session ID. Matching is case-insensitive.
pub fn resolve_crash_report(reports_dir: &Path, query: &str) -> Result<CrashReportEntry> {
    let reports = load_crash_reports(reports_dir)?;
    let query = query.trim().to_lowercase();

    if query == "latest" {
        return reports
            .into_iter()
            .next()
            .ok_or(LifelineError::ReportNotFound(query));
    }

    if let Some(exact) = reports
        .iter()
        .find(|report| report.short_id().to_lowercase() == query)
    {
        return Ok(exact.clone());
    }

    let mut matches: Vec<CrashReportEntry> = reports
        .into_iter()
        .filter(|report| {
            let file_name = report
                .json_path
                .file_name()
                .map(|name| name.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            file_name.contains(&query) || report.summary.session_id.to_lowercase().contains(&query)
        })
        .collect();

    match matches.len() {
        0 => Err(LifelineError::ReportNotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => Err(LifelineError::AmbiguousReport {
            candidates: matches
                .iter()
                .map(|report| report.short_id().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            query,
        }),
    }
}

/// The issue template section of a report's Markdown, or the whole document when
/// the section is absent.
pub fn issue_section(markdown: &str) -> String {
    match markdown.find(ISSUE_TEMPLATE_HEADING) {
        Some(start) => format!("{}\n", markdown[start..].trim()),
        None => markdown.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::crash_report_json_path;
    use tempfile::tempdir;

    fn write_report(dir: &Path, id: &str, generated_at: &str) {
        let json = crash_report_json_path(dir, id);
        std::fs::write(
            &json,
            format!(
                r#"{{"session_id":"{}","generated_at":"{}","classification":{{"class":"main_process_crash_or_abrupt","reason":"r"}}}}"#,
                id, generated_at
            ),
        )
        .unwrap();
        std::fs::write(markdown_sibling(&json), format!("# Report {}\n", id)).unwrap();
    }

    #[test]
    fn lists_newest_first_and_skips_garbage() {
        let temp = tempdir().unwrap();
        write_report(temp.path(), "old", "2026-01-01T00:00:00Z");
        write_report(temp.path(), "new", "2026-02-01T00:00:00Z");
        std::fs::write(temp.path().join("session_bad.crash.json"), "not json").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "x").unwrap();

        let reports = load_crash_reports(temp.path()).unwrap();
        let ids: Vec<&str> = reports.iter().map(|r| r.short_id()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(reports[0].summary.classification.class, "main_process_crash_or_abrupt");
        assert_eq!(reports[0].read_markdown().unwrap(), "# Report new\n");
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp = tempdir().unwrap();
        assert!(load_crash_reports(&temp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn resolves_latest_exact_and_substring() {
        let temp = tempdir().unwrap();
        write_report(temp.path(), "01abc", "2026-01-01T00:00:00Z");
        write_report(temp.path(), "01abd", "2026-01-02T00:00:00Z");
        write_report(temp.path(), "01ab", "2026-01-03T00:00:00Z");

        assert_eq!(resolve_crash_report(temp.path(), "latest").unwrap().short_id(), "01ab");
        assert_eq!(resolve_crash_report(temp.path(), "LATEST").unwrap().short_id(), "01ab");
        // Exact ID wins even though it is also a substring of the others.
        assert_eq!(resolve_crash_report(temp.path(), "01AB").unwrap().short_id(), "01ab");
        assert_eq!(resolve_crash_report(temp.path(), "abd").unwrap().short_id(), "01abd");

        match resolve_crash_report(temp.path(), "01a") {
            Err(LifelineError::AmbiguousReport { candidates, .. }) => {
                assert_eq!(candidates, "01ab, 01abd, 01abc")
            }
            other => panic!("expected AmbiguousReport, got {:?}", other),
        }
        assert!(matches!(
            resolve_crash_report(temp.path(), "zzz"),
            Err(LifelineError::ReportNotFound(_))
        ));
    }

    #[test]
    fn latest_without_reports_is_not_found() {
        let temp = tempdir().unwrap();
        assert!(matches!(
            resolve_crash_report(temp.path(), "latest"),
            Err(LifelineError::ReportNotFound(_))
        ));
    }

    #[test]
    fn issue_section_starts_at_template_heading() {
        let markdown = "# Report\n\nbody\n\n## GitHub Issue Template\nTitle: x\n\n";
        assert_eq!(issue_section(markdown), "## GitHub Issue Template\nTitle: x\n");
        assert_eq!(issue_section("# Only\n"), "# Only\n");
    }
}
