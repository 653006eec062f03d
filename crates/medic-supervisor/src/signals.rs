//! Injected safety and pacing signals polled by the watchdog
//!
//! The computation behind these signals (thermal sampling, disk-space
//! checks, deadline math, external stop files) lives with the caller; the
//! supervisor only polls the booleans on each watchdog tick.

/// External halt requests checked on every watchdog tick
pub trait SafetySignal: Send + Sync {
    /// A reason to halt the workload now, if any
    fn should_halt(&self) -> Option<String>;
}

/// Deadline-driven early-stop target checked on every watchdog tick
pub trait PacingSignal: Send + Sync {
    /// Whether the workload has done enough and can be stopped gracefully
    fn target_reached(&self) -> bool;
}

/// Signal set that never fires; the default for plain supervision
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

impl SafetySignal for NoSignals {
    fn should_halt(&self) -> Option<String> {
        None
    }
}

impl PacingSignal for NoSignals {
    fn target_reached(&self) -> bool {
        false
    }
}
