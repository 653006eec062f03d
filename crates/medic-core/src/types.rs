//! Shared types for Medic supervision and patching

use serde::{Deserialize, Serialize};

/// A single patch operation proposed by a fix provider
///
/// Parsed strictly at the provider boundary: the `mode` tag selects the
/// variant and unknown or missing modes are rejected before anything
/// touches the apply pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PatchOp {
    /// Replace an inclusive, 1-indexed line range with new code
    ReplaceRange {
        file_path: String,
        start_line: usize,
        end_line: usize,
        code: String,
    },

    /// Apply a unified diff to the file
    UnifiedDiff { file_path: String, diff: String },
}

impl PatchOp {
    /// Target path of this operation
    pub fn file_path(&self) -> &str {
        match self {
            PatchOp::ReplaceRange { file_path, .. } => file_path,
            PatchOp::UnifiedDiff { file_path, .. } => file_path,
        }
    }

    /// Lines this operation changes, used against the patch-set budget
    pub fn changed_lines(&self) -> usize {
        match self {
            PatchOp::ReplaceRange {
                start_line,
                end_line,
                code,
                ..
            } => {
                // Ranges come from provider JSON; saturate rather than trust.
                let replaced = end_line.saturating_sub(*start_line).saturating_add(1);
                replaced.max(code.lines().count())
            }
            PatchOp::UnifiedDiff { diff, .. } => diff
                .lines()
                .filter(|l| {
                    (l.starts_with('+') || l.starts_with('-'))
                        && !l.starts_with("+++")
                        && !l.starts_with("---")
                })
                .count(),
        }
    }
}

/// An ordered sequence of patch operations for one remediation attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub patches: Vec<PatchOp>,
}

impl PatchSet {
    /// Number of distinct target files
    pub fn file_count(&self) -> usize {
        let mut files: Vec<&str> = self.patches.iter().map(|p| p.file_path()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }

    /// Total changed lines across all operations
    pub fn changed_lines(&self) -> usize {
        self.patches.iter().map(|p| p.changed_lines()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Why the watchdog terminated the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchdogAction {
    /// No output for longer than the heartbeat timeout
    HeartbeatTimeout,
    /// An injected safety signal requested a halt
    SafetyHalt(String),
    /// The pacing signal reported its target reached
    TargetReached,
}

/// Terminal record of one supervised workload run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadOutcome {
    /// Process exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,

    /// Most recent stderr lines (bounded)
    pub stderr_tail: String,

    /// Most recent stdout lines (bounded)
    pub stdout_tail: String,

    /// Set when the watchdog killed the workload
    pub watchdog: Option<WatchdogAction>,
}

impl WorkloadOutcome {
    /// Exit code 0 with no watchdog intervention is the only success signal
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.watchdog.is_none()
    }

    /// Pacing stops are deliberate, not failures to classify
    pub fn is_pacing_stop(&self) -> bool {
        matches!(self.watchdog, Some(WatchdogAction::TargetReached))
    }
}

/// Recovery mode for the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryMode {
    /// Full classify → patch → verify → commit pipeline
    #[default]
    Normal,
    /// Report recovered without patching; the caller simply re-runs
    RestartOnly,
    /// Persist the provider's proposal for human review, never apply it
    AnalyzeOnly,
}

/// Severity class of a failure, derived from its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// No high-severity marker matched
    Ordinary,
    /// Out-of-memory signature; gets the tighter retry ceiling
    OutOfMemory,
}
