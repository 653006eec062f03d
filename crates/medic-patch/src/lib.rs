//! # medic-patch
//!
//! The only component permitted to mutate workload source files.
//!
//! A patch set is applied to shadow copies in a scratch directory, verified
//! there, and only then committed to the real files with a backup taken
//! before every write. Either every file in the set lands and passes
//! verification, or every already-committed file is restored from its
//! just-taken backup.

mod backup;
mod diff;
mod engine;
mod safety;
mod verify;

pub use backup::BackupStore;
pub use diff::{apply_replace_range, apply_unified_diff};
pub use engine::{ApplyOutcome, PatchEngine};
pub use safety::TargetPolicy;
pub use verify::verify_syntax;
