//! Configuration management for Medic
//!
//! A single `MedicConfig` is loaded once at startup from
//! `.medic/config.toml` and passed into each component's constructor.
//! Components never read ambient environment state directly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{MedicError, RecoveryMode, Result};

/// Top-level Medic configuration
///
/// Loaded from `.medic/config.toml` in the workload root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicConfig {
    /// The workload command to supervise
    pub workload: WorkloadConfig,

    /// Supervisor/watchdog tuning
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Patch engine limits and safety policy
    #[serde(default)]
    pub patch: PatchConfig,

    /// Failure classification and recovery behavior
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Fix provider transports
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// The command Medic supervises
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Program to execute
    pub command: String,

    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,

    /// Workload root; patches may only touch files under this directory.
    /// Defaults to the directory the config was loaded from.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Supervisor/watchdog tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Lines retained per output stream
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Kill the workload after this many seconds of output silence
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Watchdog poll interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Grace window between SIGINT and SIGKILL
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Maximum seconds to wait for reader tasks after process exit
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

/// Patch engine limits and safety policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Maximum distinct files per patch set
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum total changed lines per patch set
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Glob allow-list relative to the workload root. Empty means deny-all.
    #[serde(default = "default_allow_globs")]
    pub allow_globs: Vec<String>,

    /// Backups retained per target file name
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,

    /// Optional post-commit check command (run in the workload root)
    #[serde(default)]
    pub check_command: Option<String>,

    /// Timeout for the post-commit check command
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

/// Failure classification and recovery behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recovery mode
    #[serde(default)]
    pub mode: RecoveryMode,

    /// Attempts allowed per fingerprint before quarantine
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempts allowed for high-severity (e.g. out-of-memory) failures
    #[serde(default = "default_oom_max_attempts")]
    pub oom_max_attempts: u32,

    /// Patch target when no file can be resolved from the failure text
    #[serde(default)]
    pub default_target: Option<String>,

    /// Byte cap on target file content embedded in the remediation prompt
    #[serde(default = "default_prompt_max_bytes")]
    pub prompt_max_bytes: usize,

    /// Seconds to sleep before exiting after recovery gives up
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Fix provider transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Primary transport: "http" or "cli"
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Optional fallback transport, tried when the primary fails
    #[serde(default)]
    pub fallback: Option<String>,

    /// Maximum fallback invocations per supervisor run
    #[serde(default = "default_fallback_budget")]
    pub fallback_budget: u32,

    /// HTTP endpoint for the "http" transport
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name sent to the HTTP transport
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Command line for the "cli" transport (prompt is piped to stdin)
    #[serde(default)]
    pub cli_command: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value providers
fn default_tail_lines() -> usize {
    200
}

fn default_heartbeat_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_grace_period_secs() -> u64 {
    15
}

fn default_join_timeout_secs() -> u64 {
    10
}

fn default_max_files() -> usize {
    4
}

fn default_max_lines() -> usize {
    400
}

fn default_allow_globs() -> Vec<String> {
    vec!["**/*.py".to_string(), "**/*.json".to_string(), "**/*.toml".to_string()]
}

fn default_backup_keep() -> usize {
    5
}

fn default_check_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_oom_max_attempts() -> u32 {
    1
}

fn default_prompt_max_bytes() -> usize {
    48_000
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_primary() -> String {
    "http".to_string()
}

fn default_fallback_budget() -> u32 {
    3
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    180
}

impl MedicConfig {
    /// Load configuration from `<root>/.medic/config.toml`
    pub fn load(root: &Path) -> Result<Self> {
        let config_path = root.join(".medic/config.toml");
        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            MedicError::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        let mut config: MedicConfig = toml::from_str(&content)
            .map_err(|e| MedicError::Config(format!("Failed to parse config file: {}", e)))?;

        if config.workload.root.is_none() {
            config.workload.root = Some(root.to_path_buf());
        }
        Ok(config)
    }

    /// Write a default configuration to `<root>/.medic/config.toml`
    pub fn write_default(root: &Path, command: &str) -> Result<()> {
        let config_dir = root.join(".medic");
        std::fs::create_dir_all(&config_dir)?;

        let config = MedicConfig {
            workload: WorkloadConfig {
                command: command.to_string(),
                args: Vec::new(),
                root: None,
            },
            supervisor: SupervisorConfig::default(),
            patch: PatchConfig::default(),
            recovery: RecoveryConfig::default(),
            provider: ProviderConfig::default(),
        };
        let content = toml::to_string_pretty(&config)
            .map_err(|e| MedicError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// The workload root directory
    pub fn root(&self) -> PathBuf {
        self.workload
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory for Medic's own state (ledger, lock, backups, proposals)
    pub fn state_dir(&self) -> PathBuf {
        self.root().join(".medic")
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            grace_period_secs: default_grace_period_secs(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_lines: default_max_lines(),
            allow_globs: default_allow_globs(),
            backup_keep: default_backup_keep(),
            check_command: None,
            check_timeout_secs: default_check_timeout_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::default(),
            max_attempts: default_max_attempts(),
            oom_max_attempts: default_oom_max_attempts(),
            default_target: None,
            prompt_max_bytes: default_prompt_max_bytes(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: None,
            fallback_budget: default_fallback_budget(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            cli_command: None,
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(MedicConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_write_default_then_load() {
        let dir = TempDir::new().unwrap();
        MedicConfig::write_default(dir.path(), "python train.py").unwrap();

        let config = MedicConfig::load(dir.path()).unwrap();
        assert_eq!(config.workload.command, "python train.py");
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.recovery.oom_max_attempts, 1);
        assert_eq!(config.root(), dir.path());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let medic_dir = dir.path().join(".medic");
        std::fs::create_dir_all(&medic_dir).unwrap();
        std::fs::write(
            medic_dir.join("config.toml"),
            "[workload]\ncommand = \"python train.py\"\n\n[recovery]\nmax_attempts = 7\n",
        )
        .unwrap();

        let config = MedicConfig::load(dir.path()).unwrap();
        assert_eq!(config.recovery.max_attempts, 7);
        assert_eq!(config.patch.max_files, 4);
        assert_eq!(config.supervisor.poll_interval_secs, 5);
    }
}
