//! Secret scrubbing for log lines copied into crash reports.
//!
//! Rules run in a fixed order. URLs go first so their query strings are gone before
//! the `key=value` rule sees them.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const REDACTED: &str = "[REDACTED]";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b[a-z][a-z0-9+.\-]*://[^\s\])"'<>]+"#).unwrap());

static SECRET_KEY_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(token|access_token|id_token|code|password|passwd|secret|authorization)=([^&\s]+)")
        .unwrap()
});

static SECRET_JSON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"(token|access_token|id_token|code|password|passwd|secret|authorization)"\s*:\s*"(?:[^"\\]|\\.)*""#)
        .unwrap()
});

static SECRET_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(authorization|auth):\s*(\S[^\n,;]*)").unwrap());

/// Applies every redaction rule to `line`.
pub fn redact_sensitive_content(line: &str) -> String {
    let redacted = URL_RE.replace_all(line, |caps: &Captures<'_>| strip_url(&caps[0]));
    let redacted = SECRET_KEY_VALUE_RE.replace_all(&redacted, format!("${{1}}={}", REDACTED));
    let redacted =
        SECRET_JSON_RE.replace_all(&redacted, format!("\"${{1}}\":\"{}\"", REDACTED));
    let redacted = SECRET_HEADER_RE.replace_all(&redacted, format!("${{1}}: {}", REDACTED));
    redacted.into_owned()
}

/// Keeps scheme, host, and path. Credentials, query, and fragment are dropped.
fn strip_url(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['.', ',', ';', ':']);
    let trailing = &raw[trimmed.len()..];

    let Some((scheme, rest)) = trimmed.split_once("://") else {
        return raw.to_string();
    };
    let rest = match rest.find(['?', '#']) {
        Some(cut) => &rest[..cut],
        None => rest,
    };
    let (authority, path) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => (rest, ""),
    };
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    format!("{}://{}{}{}", scheme, host, path, trailing)
}
