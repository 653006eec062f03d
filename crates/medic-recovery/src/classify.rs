//! Failure fingerprinting, severity, and the retry/quarantine gate
//!
//! A fingerprint is a content hash of (exit code, target file name,
//! sanitized stderr prefix). Sanitization strips the run-to-run noise
//! (addresses, counters, absolute paths) so an identical failure hashes
//! identically on every re-run.

use medic_core::{FailureCategory, RecoveryConfig, Result};
use medic_state::RetryLedger;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Bytes of sanitized stderr hashed into the fingerprint
const FINGERPRINT_PREFIX_BYTES: usize = 512;

/// Markers that classify a failure as out-of-memory
const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "outofmemoryerror",
    "cuda out of memory",
    "memoryerror",
    "oom-kill",
    "killed process",
    "cannot allocate memory",
];

static HEX_ADDR: OnceLock<Regex> = OnceLock::new();
static DIGITS: OnceLock<Regex> = OnceLock::new();
static ABS_PATH: OnceLock<Regex> = OnceLock::new();

fn hex_addr() -> &'static Regex {
    HEX_ADDR.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").expect("static regex"))
}

fn digits() -> &'static Regex {
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("static regex"))
}

fn abs_path() -> &'static Regex {
    ABS_PATH.get_or_init(|| Regex::new(r"(/[\w.\-]+)+/").expect("static regex"))
}

/// Verdict of the retry/quarantine gate for one fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Remediation may proceed; `attempts` already recorded
    Proceed { attempts: u32 },
    /// Permanently barred; do no further work
    Quarantined,
    /// Ceiling reached this time; the fingerprint was just quarantined
    BudgetExhausted,
}

/// Derives fingerprints and gates remediation on the persistent ledger
pub struct FailureClassifier {
    ledger: Arc<RetryLedger>,
    config: RecoveryConfig,
}

impl FailureClassifier {
    pub fn new(ledger: Arc<RetryLedger>, config: RecoveryConfig) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }

    /// Stable fingerprint for a failure
    pub fn fingerprint(
        &self,
        exit_code: Option<i32>,
        target_file_name: Option<&str>,
        stderr_tail: &str,
    ) -> String {
        let sanitized = sanitize_stderr(stderr_tail);
        let mut end = sanitized.len().min(FINGERPRINT_PREFIX_BYTES);
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        let prefix = &sanitized[..end];

        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", exit_code));
        hasher.update(b"|");
        hasher.update(target_file_name.unwrap_or(""));
        hasher.update(b"|");
        hasher.update(prefix);
        let fingerprint = hex::encode(hasher.finalize());

        debug!("Fingerprint {} (target {:?})", &fingerprint[..12], target_file_name);
        fingerprint
    }

    /// Severity category from the failure text
    pub fn categorize(&self, stderr_tail: &str) -> FailureCategory {
        let lowered = stderr_tail.to_ascii_lowercase();
        if OOM_MARKERS.iter().any(|m| lowered.contains(m)) {
            FailureCategory::OutOfMemory
        } else {
            FailureCategory::Ordinary
        }
    }

    /// Retry ceiling applicable to a category
    pub fn ceiling(&self, category: FailureCategory) -> u32 {
        match category {
            FailureCategory::OutOfMemory => self.config.oom_max_attempts,
            FailureCategory::Ordinary => self.config.max_attempts,
        }
    }

    /// Gate a fingerprint before any expensive remediation work
    ///
    /// This is the fast path: quarantined fingerprints return immediately,
    /// before any prompt is built or provider contacted.
    pub fn gate(&self, fingerprint: &str, category: FailureCategory) -> Result<GateDecision> {
        if self.ledger.is_quarantined(fingerprint) {
            info!("Fingerprint {} is quarantined, skipping", &fingerprint[..12]);
            return Ok(GateDecision::Quarantined);
        }

        let attempts = self.ledger.attempts(fingerprint);
        let ceiling = self.ceiling(category);
        if attempts >= ceiling {
            info!(
                "Fingerprint {} exhausted its budget ({}/{}), quarantining",
                &fingerprint[..12],
                attempts,
                ceiling
            );
            self.ledger.quarantine(fingerprint)?;
            return Ok(GateDecision::BudgetExhausted);
        }

        Ok(GateDecision::Proceed { attempts })
    }
}

// Strip run-variant noise so identical failures hash identically.
fn sanitize_stderr(text: &str) -> String {
    let text = hex_addr().replace_all(text, "0xADDR");
    let text = abs_path().replace_all(&text, "/PATH/");
    let text = digits().replace_all(&text, "N");
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use medic_core::RecoveryConfig;
    use tempfile::TempDir;

    fn classifier(dir: &TempDir) -> FailureClassifier {
        let ledger = Arc::new(
            RetryLedger::load_or_default(dir.path().join("state.json")).unwrap(),
        );
        FailureClassifier::new(ledger, RecoveryConfig::default())
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);

        let a = c.fingerprint(Some(1), Some("train.py"), "ValueError: bad shape");
        let b = c.fingerprint(Some(1), Some("train.py"), "ValueError: bad shape");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_stable_across_noise() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);

        let a = c.fingerprint(
            Some(1),
            Some("train.py"),
            "Error at 0x7f3a21 in /tmp/run1234/x/train.py step 421",
        );
        let b = c.fingerprint(
            Some(1),
            Some("train.py"),
            "Error at 0x55bb91 in /tmp/run9876/y/train.py step 77",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_varies_with_inputs() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);

        let base = c.fingerprint(Some(1), Some("train.py"), "boom");
        assert_ne!(base, c.fingerprint(Some(2), Some("train.py"), "boom"));
        assert_ne!(base, c.fingerprint(Some(1), Some("model.py"), "boom"));
        assert_ne!(base, c.fingerprint(Some(1), Some("train.py"), "other kaboom"));
    }

    #[test]
    fn test_categorize_oom_markers() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);

        assert_eq!(
            c.categorize("RuntimeError: CUDA out of memory. Tried to allocate"),
            FailureCategory::OutOfMemory
        );
        assert_eq!(c.categorize("MemoryError"), FailureCategory::OutOfMemory);
        assert_eq!(
            c.categorize("ValueError: invalid literal"),
            FailureCategory::Ordinary
        );
    }

    #[test]
    fn test_gate_proceeds_then_exhausts() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);
        let fp = "f".repeat(64);

        assert_eq!(
            c.gate(&fp, FailureCategory::Ordinary).unwrap(),
            GateDecision::Proceed { attempts: 0 }
        );

        for _ in 0..3 {
            c.ledger().record_attempt(&fp).unwrap();
        }
        assert_eq!(
            c.gate(&fp, FailureCategory::Ordinary).unwrap(),
            GateDecision::BudgetExhausted
        );
        // Exhaustion quarantines; the next gate short-circuits.
        assert_eq!(
            c.gate(&fp, FailureCategory::Ordinary).unwrap(),
            GateDecision::Quarantined
        );
    }

    #[test]
    fn test_oom_ceiling_is_tighter() {
        let dir = TempDir::new().unwrap();
        let c = classifier(&dir);
        let fp = "a".repeat(64);

        c.ledger().record_attempt(&fp).unwrap();
        // One attempt exhausts the OOM budget but not the ordinary one.
        assert_eq!(
            c.gate(&fp, FailureCategory::OutOfMemory).unwrap(),
            GateDecision::BudgetExhausted
        );
    }
}
