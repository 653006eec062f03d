//! # medic-supervisor
//!
//! Owns one workload process per invocation and produces a bounded textual
//! record of its output plus its terminal exit code.
//!
//! The workload runs in its own process group. Two reader tasks drain
//! stdout and stderr into fixed-capacity ring buffers and refresh a shared
//! last-activity timestamp; a watchdog task polls the timestamp and the
//! injected safety/pacing signals, escalating from SIGINT to SIGKILL when
//! it has to intervene.

mod ring;
mod signals;
mod supervisor;

pub use ring::TailBuffer;
pub use signals::{NoSignals, PacingSignal, SafetySignal};
pub use supervisor::WorkloadSupervisor;
