//! Integration tests for the recovery pipeline's persistent state.
//!
//! These tests verify that ledger decisions survive process restarts: a
//! quarantine recorded by one orchestrator instance must still gate a
//! fresh instance pointed at the same state directory.

use async_trait::async_trait;
use medic_core::{
    MedicError, PatchConfig, PatchSet, RecoveryConfig, RecoveryMode, WorkloadOutcome,
};
use medic_patch::{PatchEngine, TargetPolicy};
use medic_recovery::{
    parse_patch_set, FailureClassifier, FixProvider, ProviderChain, RecoveryOrchestrator,
};
use medic_state::RetryLedger;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct CountingProvider {
    calls: Arc<AtomicU32>,
    response: Option<String>,
}

#[async_trait]
impl FixProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }
    async fn propose_fix(&self, _prompt: &str) -> medic_core::Result<PatchSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(text) => parse_patch_set(text),
            None => Err(MedicError::Provider("provider down".to_string())),
        }
    }
}

fn fresh_orchestrator(
    root: &Path,
    response: Option<String>,
) -> (RecoveryOrchestrator, Arc<AtomicU32>) {
    let state_dir = root.join(".medic");
    std::fs::create_dir_all(&state_dir).unwrap();

    // A new ledger instance each time, as a restarted process would have.
    let ledger = Arc::new(RetryLedger::load_or_default(state_dir.join("state.json")).unwrap());
    let config = RecoveryConfig {
        mode: RecoveryMode::Normal,
        default_target: Some("train.py".to_string()),
        ..RecoveryConfig::default()
    };
    let classifier = FailureClassifier::new(ledger, config.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let provider = ProviderChain::new(
        Box::new(CountingProvider {
            calls: Arc::clone(&calls),
            response,
        }),
        None,
        0,
    );

    let policy = TargetPolicy::new(root, &["**/*.py".to_string()]).unwrap();
    let engine = PatchEngine::new(policy, PatchConfig::default(), state_dir.join("backups"));

    let orchestrator = RecoveryOrchestrator::new(classifier, provider, engine, config, &state_dir);
    (orchestrator, calls)
}

fn crash(stderr: &str) -> WorkloadOutcome {
    WorkloadOutcome {
        exit_code: Some(1),
        stderr_tail: stderr.to_string(),
        stdout_tail: String::new(),
        watchdog: None,
    }
}

#[tokio::test]
async fn test_quarantine_survives_restart() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("train.py"), "x = 1\n").unwrap();

    let outcome = crash("RuntimeError: the same deterministic crash");

    // First instance: exhaust the retry budget so the fingerprint is
    // quarantined. The provider is down, so every attempt fails.
    {
        let (orch, _) = fresh_orchestrator(dir.path(), None);
        let ceiling = RecoveryConfig::default().max_attempts;
        for _ in 0..=ceiling {
            orch.handle_failure(&outcome).await.unwrap();
        }
    }

    // Second instance over the same state directory: the quarantine is
    // honored without a single provider call.
    let (orch, calls) = fresh_orchestrator(dir.path(), None);
    assert!(!orch.handle_failure(&outcome).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_attempt_counts_survive_restart() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("train.py"), "x = 1\n").unwrap();

    let outcome = crash("ValueError: shapes do not align");

    // Two failed attempts in the first process lifetime.
    {
        let (orch, _) = fresh_orchestrator(dir.path(), None);
        orch.handle_failure(&outcome).await.unwrap();
        orch.handle_failure(&outcome).await.unwrap();
    }

    // A restarted instance only gets the remaining budget, not a fresh one.
    let (orch, calls) = fresh_orchestrator(dir.path(), None);
    let ceiling = RecoveryConfig::default().max_attempts;
    let mut proceeded = 0;
    for _ in 0..ceiling {
        orch.handle_failure(&outcome).await.unwrap();
        let now = calls.load(Ordering::SeqCst);
        if now > proceeded {
            proceeded = now;
        }
    }
    assert_eq!(proceeded, ceiling - 2);
}

#[tokio::test]
async fn test_successful_repair_end_to_end() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("train.py"), "batch_size = 4096\n").unwrap();

    let response = r#"{"patches": [{"mode": "replace_range", "file_path": "train.py",
        "start_line": 1, "end_line": 1, "code": "batch_size = 1024\n"}]}"#;
    let (orch, calls) = fresh_orchestrator(dir.path(), Some(response.to_string()));

    let outcome = crash(
        "Traceback (most recent call last):\n  File \"train.py\", line 1, in <module>\nRuntimeError: CUDA error",
    );
    assert!(orch.handle_failure(&outcome).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let repaired = std::fs::read_to_string(dir.path().join("train.py")).unwrap();
    assert_eq!(repaired, "batch_size = 1024\n");

    // The pre-patch content is retained as a restorable backup.
    let backups: Vec<_> = std::fs::read_dir(dir.path().join(".medic/backups"))
        .unwrap()
        .collect();
    assert_eq!(backups.len(), 1);
}
