//! Patch engine: shadow apply, verify, atomic commit, rollback
//!
//! Apply pipeline for one patch set:
//! 1. budget pre-check (no disk I/O on the reject path)
//! 2. safety-check every target, seed shadow copies in a scratch dir
//! 3. apply ops in order to the shadows
//! 4. verify shadow syntax
//! 5. commit: backup each real file, then atomically replace it; a partial
//!    commit failure restores everything committed so far
//! 6. optional post-commit check command; failure rolls back every file
//!
//! Expected failure modes come back as an `ApplyOutcome` with
//! `success: false`, never as a panic or an early error.

use crate::backup::BackupStore;
use crate::diff::{apply_replace_range, apply_unified_diff};
use crate::safety::TargetPolicy;
use crate::verify::verify_syntax;
use medic_core::{MedicError, PatchConfig, PatchOp, PatchSet, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Tagged outcome of one `apply_patch_set` call
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// Whether every file was committed and verified
    pub success: bool,
    /// Human-readable disposition
    pub message: String,
    /// Files durably changed by this apply (empty unless `success`)
    pub committed: Vec<PathBuf>,
}

impl ApplyOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            committed: Vec::new(),
        }
    }
}

/// The sole mutator of workload source files
pub struct PatchEngine {
    policy: TargetPolicy,
    config: PatchConfig,
    backups: BackupStore,
}

impl PatchEngine {
    pub fn new(policy: TargetPolicy, config: PatchConfig, backup_dir: impl Into<PathBuf>) -> Self {
        let backups = BackupStore::new(backup_dir, config.backup_keep);
        Self {
            policy,
            config,
            backups,
        }
    }

    /// Safety policy shared with patch-set validation at the provider boundary
    pub fn policy(&self) -> &TargetPolicy {
        &self.policy
    }

    /// Apply a full patch set with all-or-nothing semantics
    pub fn apply_patch_set(&self, set: &PatchSet) -> ApplyOutcome {
        if set.is_empty() {
            return ApplyOutcome::rejected("Empty patch set");
        }
        // Budget gate runs before any filesystem work.
        if set.file_count() > self.config.max_files {
            return ApplyOutcome::rejected(format!(
                "Patch set touches {} files (limit {})",
                set.file_count(),
                self.config.max_files
            ));
        }
        if set.changed_lines() > self.config.max_lines {
            return ApplyOutcome::rejected(format!(
                "Patch set changes {} lines (limit {})",
                set.changed_lines(),
                self.config.max_lines
            ));
        }

        match self.apply_inner(set) {
            Ok(outcome) => outcome,
            Err(e) => ApplyOutcome::rejected(format!("Apply failed: {}", e)),
        }
    }

    fn apply_inner(&self, set: &PatchSet) -> Result<ApplyOutcome> {
        let scratch = tempfile::tempdir().map_err(MedicError::Io)?;

        // Group ops per target, preserving in-file order. BTreeMap gives a
        // deterministic commit order across runs.
        let mut per_file: BTreeMap<PathBuf, Vec<&PatchOp>> = BTreeMap::new();
        for op in &set.patches {
            let resolved = self.policy.is_safe_target(op.file_path())?;
            per_file.entry(resolved).or_default().push(op);
        }

        // Shadow phase: seed from current content, apply, verify.
        let mut shadows: Vec<(PathBuf, PathBuf)> = Vec::new(); // (real, shadow)
        for (real, ops) in &per_file {
            let mut content = if real.exists() {
                std::fs::read_to_string(real)?
            } else {
                String::new()
            };

            for op in ops {
                content = match op {
                    PatchOp::ReplaceRange {
                        start_line,
                        end_line,
                        code,
                        ..
                    } => apply_replace_range(&content, *start_line, *end_line, code),
                    PatchOp::UnifiedDiff { diff, .. } => apply_unified_diff(&content, diff)?,
                };
            }

            verify_syntax(real, &content)?;

            let relative = real
                .strip_prefix(self.policy.root())
                .map_err(|_| MedicError::UnsafeTarget(format!("{:?} left the root", real)))?;
            let shadow = scratch.path().join(relative);
            if let Some(parent) = shadow.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&shadow, &content)?;
            shadows.push((real.clone(), shadow));
        }

        // Commit phase: backup then atomic replace, restoring on partial failure.
        let mut committed: Vec<PathBuf> = Vec::new();
        let mut backed_up: Vec<(PathBuf, PathBuf)> = Vec::new(); // (real, backup)
        for (real, shadow) in &shadows {
            let commit_result = (|| -> Result<()> {
                if real.exists() {
                    let backup = self.backups.backup(real)?;
                    backed_up.push((real.clone(), backup));
                } else if let Some(parent) = real.parent() {
                    std::fs::create_dir_all(parent)?;
                }

                // Same-directory temp then rename keeps the replace atomic.
                let tmp = real.with_extension("medic.tmp");
                std::fs::copy(shadow, &tmp)?;
                std::fs::rename(&tmp, real)?;
                Ok(())
            })();

            if let Err(e) = commit_result {
                warn!("Commit failed at {:?}: {}, rolling back", real, e);
                self.rollback(&committed, &backed_up);
                return Ok(ApplyOutcome::rejected(format!(
                    "Commit failed at {:?}: {}; {} file(s) rolled back",
                    real,
                    e,
                    committed.len()
                )));
            }
            committed.push(real.clone());
        }

        info!("Committed {} file(s)", committed.len());

        // Optional post-commit verification.
        if let Some(check) = &self.config.check_command {
            let timeout = Duration::from_secs(self.config.check_timeout_secs);
            match run_check_command(check, self.policy.root(), timeout) {
                Ok(()) => {}
                Err(excerpt) => {
                    warn!("Post-commit check failed, rolling back {} file(s)", committed.len());
                    self.rollback(&committed, &backed_up);
                    return Ok(ApplyOutcome::rejected(format!(
                        "Post-commit check failed, changes rolled back: {}",
                        excerpt
                    )));
                }
            }
        }

        Ok(ApplyOutcome {
            success: true,
            message: format!("Applied {} patch(es) to {} file(s)", set.patches.len(), committed.len()),
            committed,
        })
    }

    // Restore every committed file from the exact backup taken for it in
    // this apply. Files that did not exist before are removed again.
    fn rollback(&self, committed: &[PathBuf], backed_up: &[(PathBuf, PathBuf)]) {
        for real in committed {
            match backed_up.iter().find(|(original, _)| original == real) {
                Some((_, backup)) => {
                    if let Err(e) = std::fs::copy(backup, real) {
                        warn!("Rollback failed for {:?}: {}", real, e);
                    }
                }
                None => {
                    if let Err(e) = std::fs::remove_file(real) {
                        warn!("Rollback removal failed for {:?}: {}", real, e);
                    }
                }
            }
        }
    }
}

// Run the check command through the shell with a hard deadline, returning
// a trailing excerpt of its output on failure.
fn run_check_command(
    command: &str,
    cwd: &Path,
    timeout: Duration,
) -> std::result::Result<(), String> {
    use std::process::{Command, Stdio};

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn check command: {}", e))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let output = child
                    .wait_with_output()
                    .map_err(|e| format!("failed to read check output: {}", e))?;
                if status.success() {
                    return Ok(());
                }
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                return Err(tail_excerpt(&combined, 20));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("check command timed out after {:?}", timeout));
                }
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(e) => return Err(format!("failed waiting for check command: {}", e)),
        }
    }
}

fn tail_excerpt(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
