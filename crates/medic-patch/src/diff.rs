//! Patch text application
//!
//! Two formats are supported:
//! - replace-range: splice new code over an inclusive, 1-indexed line range
//! - unified diff: walk `@@ -a,b +c,d @@` hunks against the original text
//!
//! Both operate on strings only; the engine decides what they are applied
//! to. A malformed hunk header or a context line that runs past the end of
//! the original is a hard failure, never a partial application.

use medic_core::{MedicError, Result};
use regex::Regex;
use std::sync::OnceLock;

static HUNK_HEADER: OnceLock<Regex> = OnceLock::new();

fn hunk_header() -> &'static Regex {
    HUNK_HEADER.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("static regex")
    })
}

/// Splice `code` over lines `start_line..=end_line` (1-indexed, inclusive)
///
/// Out-of-range bounds are clamped to the content, so a replace past the
/// end appends and a zero start behaves as line one.
pub fn apply_replace_range(original: &str, start_line: usize, end_line: usize, code: &str) -> String {
    let lines: Vec<&str> = original.lines().collect();
    let start = start_line.saturating_sub(1).min(lines.len());
    let end = end_line.min(lines.len()).max(start);

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.extend(lines[..start].iter().map(|l| l.to_string()));
    out.extend(code.lines().map(|l| l.to_string()));
    out.extend(lines[end..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    if original.ends_with('\n') || !result.is_empty() && code.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Apply a unified diff to `original`, returning the patched content
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String> {
    let source: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(source.len());
    let mut cursor = 0usize; // next unread line of the original

    let mut lines = diff.lines().peekable();
    let mut saw_hunk = false;

    while let Some(line) = lines.next() {
        // File headers and surrounding prose are tolerated between hunks.
        if !line.starts_with("@@") {
            continue;
        }

        let caps = hunk_header()
            .captures(line)
            .ok_or_else(|| MedicError::MalformedDiff(format!("Bad hunk header: {:?}", line)))?;
        saw_hunk = true;

        let old_start: usize = caps[1]
            .parse()
            .map_err(|_| MedicError::MalformedDiff(format!("Bad hunk header: {:?}", line)))?;
        let old_start = old_start.saturating_sub(1);

        if old_start < cursor {
            return Err(MedicError::MalformedDiff(format!(
                "Hunks out of order at {:?}",
                line
            )));
        }
        if old_start > source.len() {
            return Err(MedicError::MalformedDiff(format!(
                "Hunk starts past end of file: {:?}",
                line
            )));
        }

        // Copy unchanged lines up to the hunk.
        out.extend(source[cursor..old_start].iter().map(|l| l.to_string()));
        cursor = old_start;

        // Body: context (' '), removal ('-'), addition ('+').
        while let Some(&body) = lines.peek() {
            if body.starts_with("@@") {
                break;
            }
            lines.next();

            match body.chars().next() {
                Some(' ') | None => {
                    if cursor >= source.len() {
                        return Err(MedicError::MalformedDiff(
                            "Context line past end of original".to_string(),
                        ));
                    }
                    out.push(source[cursor].to_string());
                    cursor += 1;
                }
                Some('-') => {
                    if cursor >= source.len() {
                        return Err(MedicError::MalformedDiff(
                            "Removal past end of original".to_string(),
                        ));
                    }
                    cursor += 1;
                }
                Some('+') => {
                    out.push(body[1..].to_string());
                }
                Some('\\') => {
                    // "\ No newline at end of file"
                }
                _ => {
                    return Err(MedicError::MalformedDiff(format!(
                        "Unexpected diff line: {:?}",
                        body
                    )));
                }
            }
        }
    }

    if !saw_hunk {
        return Err(MedicError::MalformedDiff("Diff contains no hunks".to_string()));
    }

    // Remainder of the original is unchanged.
    out.extend(source[cursor..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    if original.ends_with('\n') && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
