//! Workload process supervision
//!
//! One `WorkloadSupervisor::run` call owns one workload process from spawn
//! to exit. Output draining, heartbeat enforcement, and kill escalation all
//! happen here; classification of the failure belongs to the caller.

use crate::ring::TailBuffer;
use crate::signals::{PacingSignal, SafetySignal};
use medic_core::{MedicError, Result, SupervisorConfig, WatchdogAction, WorkloadOutcome};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Supervises one workload process per `run` invocation
pub struct WorkloadSupervisor {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    config: SupervisorConfig,
    safety: Vec<Arc<dyn SafetySignal>>,
    pacing: Option<Arc<dyn PacingSignal>>,
}

impl WorkloadSupervisor {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        cwd: impl Into<PathBuf>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: cwd.into(),
            config,
            safety: Vec::new(),
            pacing: None,
        }
    }

    /// Add a safety signal polled on every watchdog tick
    pub fn with_safety_signal(mut self, signal: Arc<dyn SafetySignal>) -> Self {
        self.safety.push(signal);
        self
    }

    /// Set the pacing signal polled on every watchdog tick
    pub fn with_pacing_signal(mut self, signal: Arc<dyn PacingSignal>) -> Self {
        self.pacing = Some(signal);
        self
    }

    /// Run the workload to completion and return its bounded output record
    ///
    /// Returns only after the process has exited and all reader tasks have
    /// been joined (under a bounded timeout).
    pub async fn run(&self) -> Result<WorkloadOutcome> {
        info!("Launching workload: {} {:?}", self.command, self.args);

        let mut std_cmd = std::process::Command::new(&self.command);
        std_cmd
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        // Own process group so the whole tree can be killed as a unit.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut child = tokio::process::Command::from(std_cmd)
            .spawn()
            .map_err(|e| MedicError::Spawn(format!("{}: {}", self.command, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| MedicError::Spawn("Workload exited before it was observed".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MedicError::Supervisor("Missing stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MedicError::Supervisor("Missing stderr pipe".to_string()))?;

        let stdout_tail = Arc::new(Mutex::new(TailBuffer::new(self.config.tail_lines)));
        let stderr_tail = Arc::new(Mutex::new(TailBuffer::new(self.config.tail_lines)));
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let action = Arc::new(Mutex::new(None::<WatchdogAction>));
        let (stop_tx, stop_rx) = watch::channel(false);

        let stdout_task = tokio::spawn(drain_stream(
            BufReader::new(stdout),
            stdout_tail.clone(),
            last_activity.clone(),
            false,
        ));
        let stderr_task = tokio::spawn(drain_stream(
            BufReader::new(stderr),
            stderr_tail.clone(),
            last_activity.clone(),
            true,
        ));

        let watchdog_task = tokio::spawn(watchdog(
            pid,
            self.config.clone(),
            self.safety.clone(),
            self.pacing.clone(),
            last_activity.clone(),
            action.clone(),
            stop_rx,
        ));

        let status = child
            .wait()
            .await
            .map_err(|e| MedicError::Supervisor(format!("Wait failed: {}", e)))?;
        let _ = stop_tx.send(true);

        // Readers finish when the pipes close; bound the join anyway so a
        // misbehaving pipe cannot hang the supervisor forever.
        let join_timeout = Duration::from_secs(self.config.join_timeout_secs);
        for (name, task) in [
            ("stdout reader", stdout_task),
            ("stderr reader", stderr_task),
            ("watchdog", watchdog_task),
        ] {
            if tokio::time::timeout(join_timeout, task).await.is_err() {
                warn!("{} did not stop within {:?}", name, join_timeout);
            }
        }

        let watchdog_action = action.lock().expect("action mutex poisoned").clone();
        let outcome = WorkloadOutcome {
            exit_code: status.code(),
            stdout_tail: stdout_tail.lock().expect("tail mutex poisoned").tail(),
            stderr_tail: stderr_tail.lock().expect("tail mutex poisoned").tail(),
            watchdog: watchdog_action,
        };

        info!(
            "Workload exited: code={:?} watchdog={:?}",
            outcome.exit_code, outcome.watchdog
        );
        Ok(outcome)
    }
}

// Drain one output stream line-by-line: echo for live visibility, retain
// the bounded tail, refresh the shared activity timestamp.
async fn drain_stream<R>(
    reader: BufReader<R>,
    tail: Arc<Mutex<TailBuffer>>,
    last_activity: Arc<Mutex<Instant>>,
    is_stderr: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
        *last_activity.lock().expect("activity mutex poisoned") = Instant::now();
        tail.lock().expect("tail mutex poisoned").push(line);
    }
}

// Watchdog: polls for silence, safety halts, and pacing targets. The sole
// source of preemptive workload cancellation.
async fn watchdog(
    pid: u32,
    config: SupervisorConfig,
    safety: Vec<Arc<dyn SafetySignal>>,
    pacing: Option<Arc<dyn PacingSignal>>,
    last_activity: Arc<Mutex<Instant>>,
    action: Arc<Mutex<Option<WatchdogAction>>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let heartbeat = Duration::from_secs(config.heartbeat_timeout_secs);
    let grace = Duration::from_secs(config.grace_period_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = ticker.tick() => {}
        }

        let silence = last_activity
            .lock()
            .expect("activity mutex poisoned")
            .elapsed();
        if silence >= heartbeat {
            warn!(
                "No workload output for {:?} (limit {:?}), killing process group",
                silence, heartbeat
            );
            *action.lock().expect("action mutex poisoned") = Some(WatchdogAction::HeartbeatTimeout);
            kill_group(pid, true);
            return;
        }

        if let Some(reason) = safety.iter().find_map(|s| s.should_halt()) {
            warn!("Safety halt requested: {}", reason);
            *action.lock().expect("action mutex poisoned") =
                Some(WatchdogAction::SafetyHalt(reason));
            graceful_stop(pid, grace).await;
            return;
        }

        if pacing.as_ref().is_some_and(|p| p.target_reached()) {
            info!("Pacing target reached, stopping workload");
            *action.lock().expect("action mutex poisoned") = Some(WatchdogAction::TargetReached);
            graceful_stop(pid, grace).await;
            return;
        }
    }
}

// SIGINT, bounded grace window, then SIGKILL if the group is still alive.
async fn graceful_stop(pid: u32, grace: Duration) {
    kill_group(pid, false);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !group_alive(pid) {
            debug!("Process group {} exited within grace window", pid);
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    warn!("Process group {} outlived grace window, forcing kill", pid);
    kill_group(pid, true);
}

/// Signal the whole process group; a no-op when the group is already gone
#[cfg(unix)]
fn kill_group(pid: u32, force: bool) {
    let sig = if force { libc::SIGKILL } else { libc::SIGINT };
    let rc = unsafe { libc::kill(-(pid as i32), sig) };
    if rc != 0 {
        // ESRCH: already exited. Killing a dead tree is not an error.
        debug!("kill({}, {}) -> {}", -(pid as i64), sig, rc);
    }
}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32, _force: bool) {}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use medic_core::WatchdogAction;

    fn sh(script: &str, config: SupervisorConfig) -> WorkloadSupervisor {
        WorkloadSupervisor::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            std::env::temp_dir(),
            config,
        )
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            tail_lines: 10,
            heartbeat_timeout_secs: 600,
            poll_interval_secs: 1,
            grace_period_secs: 2,
            join_timeout_secs: 5,
        }
    }

    struct HaltNow;
    impl SafetySignal for HaltNow {
        fn should_halt(&self) -> Option<String> {
            Some("disk full".to_string())
        }
    }

    struct StopNow;
    impl PacingSignal for StopNow {
        fn target_reached(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_tails() {
        let sup = sh("echo out-line; echo err-line 1>&2; exit 3", fast_config());
        let outcome = sup.run().await.unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stdout_tail.contains("out-line"));
        assert!(outcome.stderr_tail.contains("err-line"));
        assert!(outcome.watchdog.is_none());
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_clean_exit_is_success() {
        let sup = sh("exit 0", fast_config());
        let outcome = sup.run().await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_tail_is_bounded() {
        let config = SupervisorConfig {
            tail_lines: 5,
            ..fast_config()
        };
        let sup = sh("i=0; while [ $i -lt 50 ]; do echo line-$i; i=$((i+1)); done", config);
        let outcome = sup.run().await.unwrap();

        let lines: Vec<&str> = outcome.stdout_tail.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "line-49");
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_kills_silent_workload() {
        let config = SupervisorConfig {
            heartbeat_timeout_secs: 1,
            poll_interval_secs: 1,
            ..fast_config()
        };
        let sup = sh("sleep 30", config);
        let outcome = sup.run().await.unwrap();

        assert_eq!(outcome.watchdog, Some(WatchdogAction::HeartbeatTimeout));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_safety_halt_stops_workload() {
        let sup = sh("sleep 30", fast_config()).with_safety_signal(Arc::new(HaltNow));
        let outcome = sup.run().await.unwrap();

        assert_eq!(
            outcome.watchdog,
            Some(WatchdogAction::SafetyHalt("disk full".to_string()))
        );
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_pacing_target_stops_workload() {
        let sup = sh("sleep 30", fast_config()).with_pacing_signal(Arc::new(StopNow));
        let outcome = sup.run().await.unwrap();

        assert_eq!(outcome.watchdog, Some(WatchdogAction::TargetReached));
        assert!(outcome.is_pacing_stop());
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_error() {
        let sup = WorkloadSupervisor::new(
            "definitely-not-a-real-command-xyz",
            vec![],
            std::env::temp_dir(),
            fast_config(),
        );
        assert!(sup.run().await.is_err());
    }
}
