//! Remediation prompt builder
//!
//! Constructs a bounded-size prompt containing:
//! - the target file's redacted, size-capped content
//! - the failure tails and exit code
//! - explicit formatting rules for the expected patch schema

use crate::target::TargetRef;
use medic_core::WorkloadOutcome;
use regex::Regex;
use std::sync::OnceLock;

static SECRET_ASSIGNMENT: OnceLock<Regex> = OnceLock::new();

fn secret_assignment() -> &'static Regex {
    SECRET_ASSIGNMENT.get_or_init(|| {
        Regex::new(r#"(?i)((?:api[_-]?key|token|secret|password|credential)s?["']?\s*[=:]\s*)["']?[^\s"']+["']?"#)
            .expect("static regex")
    })
}

/// Build the remediation prompt for one failure
pub fn build_remediation_prompt(
    target: &TargetRef,
    target_content: &str,
    outcome: &WorkloadOutcome,
    max_content_bytes: usize,
) -> String {
    let content = cap_content(&redact(target_content), max_content_bytes);

    let mut prompt = String::new();
    prompt.push_str("# WORKLOAD FAILURE\n\n");
    prompt.push_str(&format!(
        "The supervised workload failed with exit code {:?}.\n\n",
        outcome.exit_code
    ));

    prompt.push_str(&format!("## TARGET FILE: {}\n\n", target.path));
    if let Some(line) = target.line {
        prompt.push_str(&format!("The failure points at line {}.\n\n", line));
    }
    prompt.push_str("```\n");
    prompt.push_str(&content);
    if !content.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n\n");

    prompt.push_str("## STDERR (most recent lines)\n\n```\n");
    prompt.push_str(&redact(&outcome.stderr_tail));
    prompt.push_str("```\n\n");

    prompt.push_str("## STDOUT (most recent lines)\n\n```\n");
    prompt.push_str(&redact(&outcome.stdout_tail));
    prompt.push_str("```\n\n");

    prompt.push_str(FORMAT_RULES);
    prompt
}

const FORMAT_RULES: &str = r#"## RESPONSE FORMAT

Propose the smallest change that fixes the failure. Respond with exactly one
JSON object of this shape (prose around it is tolerated but discouraged):

{
  "patches": [
    {
      "mode": "replace_range",
      "file_path": "relative/path/from/workload/root",
      "start_line": 1,
      "end_line": 1,
      "code": "replacement text\n"
    }
  ]
}

Rules:
- "mode" is "replace_range" or "unified_diff"
- "unified_diff" entries carry a "diff" field with standard @@ hunks
- line numbers are 1-indexed and inclusive
- modify as few files and lines as possible
- never touch VCS metadata, secrets, logs, or test directories
"#;

// Redact values assigned to secret-looking keys before any text leaves
// the machine.
fn redact(text: &str) -> String {
    secret_assignment()
        .replace_all(text, "${1}[REDACTED]")
        .into_owned()
}

// Keep head and tail halves when the content exceeds the byte budget; the
// failure usually points at one of the two ends.
fn cap_content(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let half = max_bytes / 2;
    let mut head_end = half.min(content.len());
    while !content.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = content.len() - half.min(content.len());
    while !content.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{}\n... [{} bytes elided] ...\n{}",
        &content[..head_end],
        content.len() - head_end - (content.len() - tail_start),
        &content[tail_start..]
    )
}
