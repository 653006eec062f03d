//! Patch target resolution from failure text
//!
//! Scans the failure tails for the most recent in-root, type-appropriate,
//! safety-eligible file reference (a traceback frame, a `path:line` ref)
//! and falls back to the configured default target. One function per
//! extraction concern; the orchestrator only sees structured results.

use medic_patch::TargetPolicy;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

static TRACEBACK_FRAME: OnceLock<Regex> = OnceLock::new();
static PATH_LINE: OnceLock<Regex> = OnceLock::new();

fn traceback_frame() -> &'static Regex {
    TRACEBACK_FRAME.get_or_init(|| {
        Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("static regex")
    })
}

fn path_line() -> &'static Regex {
    PATH_LINE.get_or_init(|| {
        Regex::new(r"([\w./\-]+\.(?:py|rs|js|ts|json|toml|yaml|yml)):(\d+)").expect("static regex")
    })
}

/// A resolved patch target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    /// Path as referenced by the failure text (root-relative or absolute)
    pub path: String,
    /// Line number from the reference, when present
    pub line: Option<u32>,
}

/// Resolve the patch target for a failure
///
/// The deepest (most recent) eligible traceback frame wins, then the last
/// eligible `path:line` reference, then the configured default.
pub fn resolve_target(
    stderr_tail: &str,
    stdout_tail: &str,
    policy: &TargetPolicy,
    default_target: Option<&str>,
) -> Option<TargetRef> {
    let combined = format!("{}\n{}", stdout_tail, stderr_tail);

    if let Some(target) = last_traceback_frame(&combined, policy) {
        debug!("Resolved target from traceback frame: {:?}", target);
        return Some(target);
    }
    if let Some(target) = last_path_line_ref(&combined, policy) {
        debug!("Resolved target from path:line reference: {:?}", target);
        return Some(target);
    }

    let default = default_target?;
    if policy.allows(default) {
        debug!("Falling back to default target {:?}", default);
        return Some(TargetRef {
            path: default.to_string(),
            line: None,
        });
    }
    None
}

// Python-style tracebacks list frames outermost first; the last eligible
// frame is where the failure actually surfaced.
fn last_traceback_frame(text: &str, policy: &TargetPolicy) -> Option<TargetRef> {
    traceback_frame()
        .captures_iter(text)
        .filter_map(|caps| {
            let path = caps.get(1)?.as_str();
            let line = caps.get(2)?.as_str().parse().ok();
            policy.allows(path).then(|| TargetRef {
                path: path.to_string(),
                line,
            })
        })
        .last()
}

fn last_path_line_ref(text: &str, policy: &TargetPolicy) -> Option<TargetRef> {
    path_line()
        .captures_iter(text)
        .filter_map(|caps| {
            let path = caps.get(1)?.as_str();
            let line = caps.get(2)?.as_str().parse().ok();
            policy.allows(path).then(|| TargetRef {
                path: path.to_string(),
                line,
            })
        })
        .last()
}
