//! Target-safety policy for patch destinations
//!
//! Evaluated per file before any content is read or written:
//! 1. the path must normalize to a location inside the workload root;
//! 2. no path segment may match the deny-list (VCS metadata, virtualenvs,
//!    build output, secrets, logs, tests) unless the file name marks a
//!    disposable artifact;
//! 3. the path must match at least one allow-list glob. An empty allow-list
//!    denies everything.

use glob::Pattern;
use medic_core::{MedicError, Result};
use std::path::{Component, Path, PathBuf};

/// Path segments no patch may ever touch
const DENY_SEGMENTS: &[&str] = &[
    ".git",
    ".jj",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "env",
    "node_modules",
    "__pycache__",
    "target",
    "build",
    "dist",
    ".secrets",
    "secrets",
    ".credentials",
    "credentials",
    ".env",
    "logs",
    "log",
    "tests",
    "test",
    ".medic",
];

/// File-name markers that exempt a path from the deny-list
const DISPOSABLE_MARKERS: &[&str] = &["dummy", "scratch", "disposable"];

/// Safety policy scoped to one workload root
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    root: PathBuf,
    allow: Vec<Pattern>,
}

impl TargetPolicy {
    /// Build a policy from allow-list globs relative to the workload root
    pub fn new(root: impl Into<PathBuf>, allow_globs: &[String]) -> Result<Self> {
        let allow = allow_globs
            .iter()
            .map(|g| {
                Pattern::new(g)
                    .map_err(|e| MedicError::Config(format!("Bad allow glob {:?}: {}", g, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.into(),
            allow,
        })
    }

    /// The workload root this policy guards
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a patch target, returning its absolute normalized path
    ///
    /// Fails closed: anything that escapes the root, hits the deny-list, or
    /// misses the allow-list is rejected before any I/O happens.
    pub fn is_safe_target(&self, file_path: &str) -> Result<PathBuf> {
        let candidate = Path::new(file_path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let resolved = normalize(&joined);
        let relative = resolved.strip_prefix(&self.root).map_err(|_| {
            MedicError::UnsafeTarget(format!("{} escapes the workload root", file_path))
        })?;

        if !is_disposable(relative) {
            for component in relative.components() {
                if let Component::Normal(seg) = component {
                    let seg = seg.to_string_lossy();
                    if DENY_SEGMENTS.iter().any(|d| seg.eq_ignore_ascii_case(d)) {
                        return Err(MedicError::UnsafeTarget(format!(
                            "{} contains denied segment {:?}",
                            file_path, seg
                        )));
                    }
                }
            }
        }

        let relative_str = relative.to_string_lossy();
        if !self.allow.iter().any(|p| p.matches(&relative_str)) {
            return Err(MedicError::UnsafeTarget(format!(
                "{} matches no allow-list pattern",
                file_path
            )));
        }

        Ok(resolved)
    }

    /// Boolean form of `is_safe_target` for use in candidate scans
    pub fn allows(&self, file_path: &str) -> bool {
        self.is_safe_target(file_path).is_ok()
    }
}

// Lexical normalization: collapses `.` and `..` without touching the
// filesystem, so targets that do not exist yet can still be validated.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_disposable(relative: &Path) -> bool {
    relative
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| {
            let stem = stem.to_ascii_lowercase();
            DISPOSABLE_MARKERS.iter().any(|m| stem.contains(m))
        })
        .unwrap_or(false)
}
