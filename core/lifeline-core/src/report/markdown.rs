//! Markdown rendering of an [`UnexpectedCloseReport`].

use std::path::Path;

use super::UnexpectedCloseReport;
use crate::fsutil::format_timestamp;

pub const ISSUE_TEMPLATE_HEADING: &str = "## GitHub Issue Template";

pub fn build_markdown(report: &UnexpectedCloseReport) -> String {
    let classification = &report.classification;
    let core = &report.core_dump_diagnostics;

    let mut lines = vec![
        "# Unexpected Close Report".to_string(),
        String::new(),
        format!("Generated: `{}`", format_timestamp(report.generated_at)),
        format!("Session: `{}`", report.session_id),
        format!("Class: `{}`", classification.class),
        format!("Inference: `{}`", classification.inference),
        format!("Reason: `{}`", classification.reason),
        String::new(),
        "## Process Context".to_string(),
        format!("- startup pid: `{}`", report.startup_pid),
        format!("- startup ppid: `{}`", report.startup_ppid),
        format!("- reporter pid: `{}`", report.reporter_process.pid),
        format!("- reporter ppid: `{}`", report.reporter_process.ppid),
        format!(
            "- reporter: `{} {}` on `{} {}` ({})",
            report.reporter_process.generated_by,
            report.reporter_process.version,
            report.reporter_process.os,
            report.reporter_process.os_version,
            report.reporter_process.arch
        ),
        String::new(),
        "## Core Dump Diagnostics".to_string(),
        format!("- RLIMIT_CORE soft: `{}`", core.rlimit_core_soft),
        format!("- RLIMIT_CORE hard: `{}`", core.rlimit_core_hard),
        format!("- hint: {}", core.hint),
        String::new(),
        "## Marker Files".to_string(),
        format!("- startup: `{}`", display(&report.marker_files.startup)),
        format!("- shutdown: `{}`", display(&report.marker_files.shutdown)),
        format!("- abrupt: `{}`", display(&report.marker_files.abrupt)),
    ];

    if !report.session_log_tail_redacted.is_empty() {
        lines.push(String::new());
        lines.push("## Redacted Log Tail".to_string());
        lines.push("```text".to_string());
        lines.extend(report.session_log_tail_redacted.iter().cloned());
        lines.push("```".to_string());
    }

    lines.extend([
        String::new(),
        ISSUE_TEMPLATE_HEADING.to_string(),
        format!("Title: {}", report.issue_template.title),
        String::new(),
        "```markdown".to_string(),
        "### What happened".to_string(),
        "Describe what you were doing just before the application closed unexpectedly."
            .to_string(),
        String::new(),
        "### Crash report".to_string(),
        format!("- session id: `{}`", report.session_id),
        format!("- class: `{}`", classification.class),
        format!("- reason: `{}`", classification.reason),
        String::new(),
        "### Additional context".to_string(),
        "- distro:".to_string(),
        "- compositor/window manager:".to_string(),
        "- steps to reproduce:".to_string(),
        "```".to_string(),
    ]);

    let mut markdown = lines.join("\n");
    markdown.push('\n');
    markdown
}

fn display(path: &Path) -> std::borrow::Cow<'_, str> {
    path.to_string_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ExitClass, ExitClassification, Inference};
    use crate::report::{
        CoreDumpDiagnostics, IssueTemplate, MarkerFiles, ReporterProcess, REPORT_VERSION,
    };
    use chrono::{TimeZone, Utc};

    fn report(tail: Vec<String>) -> UnexpectedCloseReport {
        UnexpectedCloseReport {
            report_version: REPORT_VERSION,
            generated_at: Utc.with_ymd_and_hms(2026, 2, 8, 10, 5, 0).unwrap(),
            session_id: "s1".to_string(),
            classification: ExitClassification {
                session_id: "s1".to_string(),
                class: ExitClass::MainProcessCrashOrAbrupt,
                inference: Inference::MarkerConfirmed,
                reason: "abrupt marker present and no shutdown marker".to_string(),
                startup_at: None,
                shutdown_at: None,
                abrupt_detected_at: None,
                last_marker_observed: None,
                owner_alive: None,
            },
            startup_pid: 100,
            startup_ppid: 1,
            marker_files: MarkerFiles::for_session(Path::new("/locks"), "s1"),
            session_log_file: None,
            session_log_tail_redacted: tail,
            reporter_process: ReporterProcess {
                generated_by: "lifeline".to_string(),
                version: "0.0.0".to_string(),
                os: "linux".to_string(),
                os_version: "Linux 6".to_string(),
                arch: "x86_64".to_string(),
                pid: 200,
                ppid: 2,
            },
            core_dump_diagnostics: CoreDumpDiagnostics {
                rlimit_core_soft: "0".to_string(),
                rlimit_core_hard: "unlimited".to_string(),
                hint: "enable them".to_string(),
            },
            issue_template: IssueTemplate::for_session("s1"),
            generated_markdown_ref: None,
        }
    }

    #[test]
    fn renders_sections_in_order() {
        let markdown = build_markdown(&report(vec!["a".to_string(), "b".to_string()]));
        let headings = [
            "# Unexpected Close Report",
            "## Process Context",
            "## Core Dump Diagnostics",
            "## Marker Files",
            "## Redacted Log Tail",
            ISSUE_TEMPLATE_HEADING,
        ];
        let positions: Vec<usize> = headings
            .iter()
            .map(|heading| markdown.find(heading).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));

        assert!(markdown.contains("Generated: `2026-02-08T10:05:00Z`"));
        assert!(markdown.contains("- startup pid: `100`"));
        assert!(markdown.contains("- startup: `/locks/session_s1.startup.marker`"));
        assert!(markdown.contains("```text\na\nb\n```"));
        assert!(markdown.contains("- class: `main_process_crash_or_abrupt`"));
        assert!(markdown.contains("Title: Unexpected close in session s1"));
        assert!(markdown.ends_with("```\n"));
    }

    #[test]
    fn omits_tail_section_when_empty() {
        let markdown = build_markdown(&report(Vec::new()));
        assert!(!markdown.contains("## Redacted Log Tail"));
    }
}
