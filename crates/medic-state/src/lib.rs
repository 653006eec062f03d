//! # medic-state
//!
//! Durable, crash-safe state for Medic:
//!
//! - `RetryLedger`: per-fingerprint attempt counts plus the permanent
//!   quarantine set, rewritten atomically on every mutation
//! - `InstanceLock`: liveness-checked single-instance lock on a workload
//!   root

mod ledger;
mod lock;

pub use ledger::RetryLedger;
pub use lock::InstanceLock;
