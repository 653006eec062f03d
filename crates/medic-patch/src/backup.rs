//! Timestamped pre-patch backups with count-based retention
//!
//! One backup file per (target, timestamp) under the backups directory,
//! named `<file_name>.<path tag>.<UTC timestamp>.bak`. The path tag is a
//! short hash of the target's full path, so same-named files in different
//! directories keep fully independent backup histories. Retention is per
//! target: taking a new backup prunes the oldest entries beyond the
//! configured keep count.

use chrono::Utc;
use medic_core::{MedicError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Store of pre-patch file copies
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    keep: usize,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
        }
    }

    /// Copy `target`'s current content into the store, pruning old entries
    ///
    /// Returns the path of the new backup.
    pub fn backup(&self, target: &Path) -> Result<PathBuf> {
        let prefix = Self::prefix_for(target)?;

        std::fs::create_dir_all(&self.dir)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%9f");
        let backup_path = self.dir.join(format!("{}{}.bak", prefix, stamp));
        std::fs::copy(target, &backup_path)?;
        debug!("Backed up {:?} to {:?}", target, backup_path);

        self.prune(&prefix)?;
        Ok(backup_path)
    }

    /// Most recent backup for a target, if any
    pub fn latest(&self, target: &Path) -> Option<PathBuf> {
        let prefix = Self::prefix_for(target).ok()?;
        let mut entries = self.entries_for(&prefix).ok()?;
        entries.pop()
    }

    /// Restore `target` from its most recent backup
    pub fn restore(&self, target: &Path) -> Result<()> {
        let backup = self.latest(target).ok_or_else(|| {
            MedicError::Patch(format!("No backup available for {:?}", target))
        })?;

        std::fs::copy(&backup, target)?;
        debug!("Restored {:?} from {:?}", target, backup);
        Ok(())
    }

    // `<file_name>.<path tag>.` — the tag pins the full path, so two
    // targets never share entries just because their names collide or one
    // name is a prefix of the other.
    fn prefix_for(target: &Path) -> Result<String> {
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MedicError::Patch(format!("No file name in {:?}", target)))?;

        let mut hasher = Sha256::new();
        hasher.update(target.to_string_lossy().as_bytes());
        let tag = hex::encode(&hasher.finalize()[..4]);
        Ok(format!("{}.{}.", file_name, tag))
    }

    // Timestamps are fixed-width, so name order is age order. Only names of
    // the exact `<prefix><stamp>.bak` shape count as entries.
    fn entries_for(&self, prefix: &str) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = Vec::new();

        if !self.dir.exists() {
            return Ok(entries);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            let stamp = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(".bak"));
            if stamp.is_some_and(is_stamp) {
                entries.push(path);
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn prune(&self, prefix: &str) -> Result<()> {
        let entries = self.entries_for(prefix)?;
        if entries.len() <= self.keep {
            return Ok(());
        }

        let excess = entries.len() - self.keep;
        for stale in &entries[..excess] {
            if let Err(e) = std::fs::remove_file(stale) {
                warn!("Failed to prune backup {:?}: {}", stale, e);
            }
        }
        Ok(())
    }
}

// `%Y%m%dT%H%M%S%9f`: 8 digits, 'T', then 15 digits.
fn is_stamp(s: &str) -> bool {
    s.len() == 24
        && s.chars()
            .enumerate()
            .all(|(i, c)| if i == 8 { c == 'T' } else { c.is_ascii_digit() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_target(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_backup_copies_current_content() {
        let dir = TempDir::new().unwrap();
        let target = write_target(&dir, "train.py", "v1");
        let store = BackupStore::new(dir.path().join("backups"), 3);

        let backup = store.backup(&target).unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "v1");
    }

    #[test]
    fn test_retention_keeps_n_most_recent() {
        let dir = TempDir::new().unwrap();
        let target = write_target(&dir, "train.py", "v0");
        let store = BackupStore::new(dir.path().join("backups"), 3);

        for i in 1..=4 {
            std::fs::write(&target, format!("v{}", i)).unwrap();
            store.backup(&target).unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 3);

        // The oldest (v1) was pruned; the latest retained is v4.
        let latest = store.latest(&target).unwrap();
        assert_eq!(std::fs::read_to_string(latest).unwrap(), "v4");
    }

    #[test]
    fn test_restore_uses_most_recent_backup() {
        let dir = TempDir::new().unwrap();
        let target = write_target(&dir, "train.py", "good");
        let store = BackupStore::new(dir.path().join("backups"), 3);

        store.backup(&target).unwrap();
        std::fs::write(&target, "broken").unwrap();

        store.restore(&target).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "good");
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let dir = TempDir::new().unwrap();
        let target = write_target(&dir, "train.py", "x");
        let store = BackupStore::new(dir.path().join("backups"), 3);

        assert!(store.restore(&target).is_err());
    }

    #[test]
    fn test_retention_is_per_target() {
        let dir = TempDir::new().unwrap();
        let a = write_target(&dir, "a.py", "a");
        let b = write_target(&dir, "b.py", "b");
        let store = BackupStore::new(dir.path().join("backups"), 1);

        store.backup(&a).unwrap();
        store.backup(&b).unwrap();

        assert!(store.latest(&a).is_some());
        assert!(store.latest(&b).is_some());
    }

    #[test]
    fn test_same_name_in_different_dirs_kept_apart() {
        let dir = TempDir::new().unwrap();
        let a = write_target(&dir, "a/config.json", "side-a");
        let b = write_target(&dir, "b/config.json", "side-b");
        let store = BackupStore::new(dir.path().join("backups"), 3);

        store.backup(&a).unwrap();
        store.backup(&b).unwrap();

        let latest_a = store.latest(&a).unwrap();
        let latest_b = store.latest(&b).unwrap();
        assert_eq!(std::fs::read_to_string(latest_a).unwrap(), "side-a");
        assert_eq!(std::fs::read_to_string(latest_b).unwrap(), "side-b");

        // Each restore pulls from its own history.
        std::fs::write(&a, "clobbered").unwrap();
        store.restore(&a).unwrap();
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "side-a");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "side-b");
    }

    #[test]
    fn test_prefix_named_target_does_not_cross_match() {
        let dir = TempDir::new().unwrap();
        let plain = write_target(&dir, "a.py", "plain");
        let suffixed = write_target(&dir, "a.py.orig", "suffixed");
        let store = BackupStore::new(dir.path().join("backups"), 1);

        store.backup(&plain).unwrap();
        store.backup(&suffixed).unwrap();

        // Retention of 1 per target must not treat these as one history.
        let latest_plain = store.latest(&plain).unwrap();
        assert_eq!(std::fs::read_to_string(latest_plain).unwrap(), "plain");
        let latest_suffixed = store.latest(&suffixed).unwrap();
        assert_eq!(std::fs::read_to_string(latest_suffixed).unwrap(), "suffixed");
    }

    #[test]
    fn test_stray_files_in_backup_dir_are_ignored() {
        let dir = TempDir::new().unwrap();
        let target = write_target(&dir, "a.py", "real");
        let store = BackupStore::new(dir.path().join("backups"), 3);
        let backup = store.backup(&target).unwrap();

        // A name with the right prefix but a malformed timestamp is not an
        // entry, even though "zzz..." sorts after any real stamp.
        let name = backup.file_name().unwrap().to_str().unwrap();
        let stray = format!("{}zzzzzzzzzzzzzzzzzzzzzzzz.bak", &name[..name.len() - 28]);
        std::fs::write(dir.path().join("backups").join(stray), "junk").unwrap();

        let latest = store.latest(&target).unwrap();
        assert_eq!(std::fs::read_to_string(latest).unwrap(), "real");
    }
}
