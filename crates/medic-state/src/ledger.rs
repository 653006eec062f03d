//! Retry ledger and quarantine set
//!
//! One JSON file holds both structures:
//! `{ "retries": { fingerprint: count }, "quarantine": [fingerprint, ...] }`.
//! Every mutation rewrites the whole file through a temp-file-then-rename so
//! a crash mid-write never corrupts the previous durable state. All access
//! is serialized behind one mutex; remediation attempts are sequential so
//! contention is not a concern.

use medic_core::{MedicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerData {
    #[serde(default)]
    retries: HashMap<String, u32>,

    #[serde(default)]
    quarantine: HashSet<String>,
}

/// Durable ledger of per-fingerprint retry counts and quarantined failures
pub struct RetryLedger {
    path: PathBuf,
    inner: Mutex<LedgerData>,
}

impl RetryLedger {
    /// Load the ledger from `path`, starting empty if the file is missing
    pub fn load_or_default(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| MedicError::State(format!("Corrupt ledger {}: {}", path.display(), e)))?
        } else {
            LedgerData::default()
        };

        debug!(
            "Loaded ledger from {:?}: {} fingerprints, {} quarantined",
            path,
            data.retries.len(),
            data.quarantine.len()
        );

        Ok(Self {
            path,
            inner: Mutex::new(data),
        })
    }

    /// Attempts recorded so far for a fingerprint
    pub fn attempts(&self, fingerprint: &str) -> u32 {
        let data = self.inner.lock().expect("ledger mutex poisoned");
        data.retries.get(fingerprint).copied().unwrap_or(0)
    }

    /// Record one attempt against a fingerprint, returning the new count
    ///
    /// Counts are monotonic; nothing ever decrements them.
    pub fn record_attempt(&self, fingerprint: &str) -> Result<u32> {
        let mut data = self.inner.lock().expect("ledger mutex poisoned");
        let count = data.retries.entry(fingerprint.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        Self::persist(&self.path, &data)?;
        Ok(count)
    }

    /// Whether a fingerprint has been permanently quarantined
    pub fn is_quarantined(&self, fingerprint: &str) -> bool {
        let data = self.inner.lock().expect("ledger mutex poisoned");
        data.quarantine.contains(fingerprint)
    }

    /// Permanently bar a fingerprint from further remediation
    pub fn quarantine(&self, fingerprint: &str) -> Result<()> {
        let mut data = self.inner.lock().expect("ledger mutex poisoned");
        if data.quarantine.insert(fingerprint.to_string()) {
            info!("Quarantined fingerprint {}", fingerprint);
            Self::persist(&self.path, &data)?;
        }
        Ok(())
    }

    /// Summary counts for status reporting: (tracked fingerprints, quarantined)
    pub fn summary(&self) -> (usize, usize) {
        let data = self.inner.lock().expect("ledger mutex poisoned");
        (data.retries.len(), data.quarantine.len())
    }

    // Full-state write: temp file in the same directory, then rename over
    // the old state so readers never observe a partial write.
    fn persist(path: &Path, data: &LedgerData) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_path(dir: &TempDir) -> PathBuf {
        dir.path().join("state.json")
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = RetryLedger::load_or_default(ledger_path(&dir)).unwrap();
        assert_eq!(ledger.attempts("abc"), 0);
        assert!(!ledger.is_quarantined("abc"));
    }

    #[test]
    fn test_record_attempt_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let ledger = RetryLedger::load_or_default(ledger_path(&dir)).unwrap();

        assert_eq!(ledger.record_attempt("fp1").unwrap(), 1);
        assert_eq!(ledger.record_attempt("fp1").unwrap(), 2);
        assert_eq!(ledger.record_attempt("fp2").unwrap(), 1);
        assert_eq!(ledger.attempts("fp1"), 2);
    }

    #[test]
    fn test_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = ledger_path(&dir);

        {
            let ledger = RetryLedger::load_or_default(&path).unwrap();
            ledger.record_attempt("fp1").unwrap();
            ledger.record_attempt("fp1").unwrap();
            ledger.quarantine("fp1").unwrap();
        }

        let ledger = RetryLedger::load_or_default(&path).unwrap();
        assert_eq!(ledger.attempts("fp1"), 2);
        assert!(ledger.is_quarantined("fp1"));
    }

    #[test]
    fn test_quarantine_is_sticky_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let ledger = RetryLedger::load_or_default(ledger_path(&dir)).unwrap();

        ledger.quarantine("fp1").unwrap();
        ledger.quarantine("fp1").unwrap();
        assert!(ledger.is_quarantined("fp1"));

        let (_, quarantined) = ledger.summary();
        assert_eq!(quarantined, 1);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = ledger_path(&dir);
        let ledger = RetryLedger::load_or_default(&path).unwrap();
        ledger.record_attempt("fp").unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_wire_format_matches_expected_shape() {
        let dir = TempDir::new().unwrap();
        let path = ledger_path(&dir);
        let ledger = RetryLedger::load_or_default(&path).unwrap();
        ledger.record_attempt("fp1").unwrap();
        ledger.quarantine("fp2").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["retries"]["fp1"], 1);
        assert!(raw["quarantine"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("fp2")));
    }
}
