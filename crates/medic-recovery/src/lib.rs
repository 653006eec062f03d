//! # medic-recovery
//!
//! Decides, for a given workload failure, whether to attempt remediation,
//! and drives that attempt end-to-end:
//!
//! - `FailureClassifier`: stable fingerprints, severity categories, and the
//!   retry/quarantine gate backed by the persistent ledger
//! - target resolution: pick the file the failure points at
//! - quick fixes: cheap domain-specific remediation that skips the provider
//! - fix providers: HTTP and CLI transports behind one trait, chained with
//!   a budgeted fallback
//! - `RecoveryOrchestrator`: the prompt → propose → validate → apply flow

mod classify;
mod orchestrator;
mod prompt;
mod provider;
mod quickfix;
mod target;

pub use classify::{FailureClassifier, GateDecision};
pub use orchestrator::RecoveryOrchestrator;
pub use prompt::build_remediation_prompt;
pub use provider::{
    parse_patch_set, CliFixProvider, FixProvider, HttpFixProvider, ProviderChain,
};
pub use quickfix::{IsolateBadInputFix, QuickFix, QuickFixPipeline};
pub use target::{resolve_target, TargetRef};
