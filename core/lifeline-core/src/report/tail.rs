//! Last-N-lines reader for session logs.

use std::io::{BufRead, BufReader};
use std::path::Path;

use fs_err as fs;

use super::redact::redact_sensitive_content;

/// Longest line kept from a log. Anything past this is dropped from the line.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// Reads the last `lines` lines of `path` in one pass, redacting each as it is read.
///
/// Memory is bounded by `lines` ring slots of at most [`MAX_LINE_BYTES`] each.
/// A missing or unreadable file yields an empty tail. A read error part way through
/// keeps what was captured and appends a `[log tail truncated: ...]` line.
pub fn read_redacted_log_tail(path: &Path, lines: usize) -> Vec<String> {
    if lines == 0 {
        return Vec::new();
    }
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };
    let mut reader = BufReader::new(file);

    let mut ring: Vec<String> = Vec::with_capacity(lines);
    let mut count = 0usize;
    let mut buf = Vec::new();
    let mut failure = None;

    loop {
        buf.clear();
        match read_bounded_line(&mut reader, &mut buf, MAX_LINE_BYTES) {
            Ok(false) => break,
            Ok(true) => {
                let line = redact_sensitive_content(&String::from_utf8_lossy(&buf));
                if ring.len() < lines {
                    ring.push(line);
                } else {
                    ring[count % lines] = line;
                }
                count += 1;
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    if count > lines {
        ring.rotate_left(count % lines);
    }
    if let Some(err) = failure {
        ring.push(format!("[log tail truncated: {}]", err));
    }
    ring
}

/// Reads one line into `buf` without its terminator, keeping at most `max` bytes.
///
/// Returns `Ok(false)` at end of input when nothing was read.
fn read_bounded_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<bool> {
    let mut read_any = false;
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            break;
        }
        read_any = true;

        let (chunk, consumed, done) = match available.iter().position(|b| *b == b'\n') {
            Some(newline) => (&available[..newline], newline + 1, true),
            None => (available, available.len(), false),
        };
        let room = max.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        reader.consume(consumed);
        if done {
            break;
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(read_any)
}
