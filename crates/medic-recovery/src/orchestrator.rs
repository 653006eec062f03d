//! End-to-end remediation flow for one workload failure
//!
//! Runs the pipeline in a fixed order: quick fixes, target resolution,
//! fingerprint gating, mode short-circuits, then the full prompt →
//! provider → apply path. Gating happens before the mode check so the
//! retry ceiling bounds restart loops for deterministic crashes too.

use crate::classify::{FailureClassifier, GateDecision};
use crate::prompt::build_remediation_prompt;
use crate::provider::ProviderChain;
use crate::quickfix::QuickFixPipeline;
use crate::target::resolve_target;
use medic_core::{FailureCategory, RecoveryConfig, RecoveryMode, Result, WorkloadOutcome};
use medic_patch::PatchEngine;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Drives classification, proposal, and patch application for failures
pub struct RecoveryOrchestrator {
    classifier: FailureClassifier,
    quick_fixes: QuickFixPipeline,
    provider: ProviderChain,
    engine: PatchEngine,
    config: RecoveryConfig,
    state_dir: PathBuf,
}

impl RecoveryOrchestrator {
    pub fn new(
        classifier: FailureClassifier,
        provider: ProviderChain,
        engine: PatchEngine,
        config: RecoveryConfig,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            classifier,
            quick_fixes: QuickFixPipeline::new(),
            provider,
            engine,
            config,
            state_dir: state_dir.into(),
        }
    }

    /// Register a quick fix ahead of the provider path
    pub fn with_quick_fix(mut self, fix: Box<dyn crate::quickfix::QuickFix>) -> Self {
        self.quick_fixes.add(fix);
        self
    }

    /// Handle one failure; returns whether the workload should restart
    pub async fn handle_failure(&self, outcome: &WorkloadOutcome) -> Result<bool> {
        // Cheap domain-specific fixes first; a handled failure never
        // touches the ledger or the provider.
        if self.quick_fixes.try_all(&outcome.stderr_tail).await {
            info!("Quick fix handled the failure, restarting");
            return Ok(true);
        }

        let target = resolve_target(
            &outcome.stderr_tail,
            &outcome.stdout_tail,
            self.engine.policy(),
            self.config.default_target.as_deref(),
        );
        let target_file_name = target.as_ref().and_then(|t| {
            Path::new(&t.path)
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        });

        let fingerprint = self.classifier.fingerprint(
            outcome.exit_code,
            target_file_name.as_deref(),
            &outcome.stderr_tail,
        );
        let category = self.classifier.categorize(&outcome.stderr_tail);

        match self.classifier.gate(&fingerprint, category)? {
            GateDecision::Proceed { attempts } => {
                info!(
                    "Remediating fingerprint {} (attempt {}, category {:?})",
                    &fingerprint[..12],
                    attempts + 1,
                    category
                );
            }
            GateDecision::Quarantined | GateDecision::BudgetExhausted => {
                return Ok(false);
            }
        }

        // One attempt per handled failure, regardless of how it ends.
        self.classifier.ledger().record_attempt(&fingerprint)?;

        if self.config.mode == RecoveryMode::RestartOnly {
            info!("Restart-only mode, restarting without remediation");
            return Ok(true);
        }

        let target = match target {
            Some(t) => t,
            None => {
                warn!("No eligible patch target resolved, not remediating");
                return Ok(false);
            }
        };

        let resolved = match self.engine.policy().is_safe_target(&target.path) {
            Ok(path) => path,
            Err(e) => {
                warn!("Resolved target {:?} rejected: {}", target.path, e);
                return Ok(false);
            }
        };
        let content = match std::fs::read_to_string(&resolved) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read target {:?}: {}", resolved, e);
                return Ok(false);
            }
        };

        let prompt =
            build_remediation_prompt(&target, &content, outcome, self.config.prompt_max_bytes);
        let patch_set = match self.provider.propose_fix(&prompt).await {
            Ok(set) => set,
            Err(e) => {
                warn!("No usable proposal: {}", e);
                self.quarantine_failed_oom(&fingerprint, category)?;
                return Ok(false);
            }
        };

        if self.config.mode == RecoveryMode::AnalyzeOnly {
            self.persist_proposal(&fingerprint, &patch_set)?;
            info!("Analyze-only mode, proposal saved without applying");
            return Ok(false);
        }

        let apply = self.engine.apply_patch_set(&patch_set);
        if apply.success {
            info!(
                "Remediation committed {} file(s): {}",
                apply.committed.len(),
                apply.message
            );
            Ok(true)
        } else {
            warn!("Remediation failed: {}", apply.message);
            self.quarantine_failed_oom(&fingerprint, category)?;
            Ok(false)
        }
    }

    // Out-of-memory failures get exactly one shot; a failed attempt is
    // quarantined immediately rather than waiting for the next gate.
    fn quarantine_failed_oom(&self, fingerprint: &str, category: FailureCategory) -> Result<()> {
        if category == FailureCategory::OutOfMemory {
            warn!(
                "Failed out-of-memory remediation, quarantining {}",
                &fingerprint[..12]
            );
            self.classifier.ledger().quarantine(fingerprint)?;
        }
        Ok(())
    }

    fn persist_proposal(&self, fingerprint: &str, set: &medic_core::PatchSet) -> Result<()> {
        let dir = self.state_dir.join("proposals");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", fingerprint));
        std::fs::write(&path, serde_json::to_string_pretty(set)?)?;
        info!("Proposal written to {:?}", path);
        Ok(())
    }
}
