//! # medic-core
//!
//! Core types for Medic, a supervisor for long-running, failure-prone
//! workload processes (typically training jobs).
//!
//! Medic runs the workload, watches it for hangs and crashes, classifies
//! each failure, and attempts to repair the workload's source files with
//! patches proposed by an external fix provider. Repairs are applied to
//! shadow copies, verified, and committed atomically with backups so a bad
//! patch can always be rolled back.
//!
//! ## Core loop
//!
//! - Supervise: run the workload, tail its output, enforce a heartbeat
//! - Classify: fingerprint the failure, gate on retry budget/quarantine
//! - Patch: propose, validate, shadow-apply, verify, commit
//! - Restart on recovery, cool down and stop on exhaustion

mod config;
mod error;
mod types;

pub use config::{
    MedicConfig, PatchConfig, ProviderConfig, RecoveryConfig, SupervisorConfig, WorkloadConfig,
};
pub use error::{MedicError, Result};
pub use types::*;
