//! Medic CLI - supervised recovery for failure-prone workloads
//!
//! Usage:
//!   medic init <command>    Write a default config for a workload
//!   medic run               Supervise the configured workload
//!   medic status            Show ledger and lock state

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use medic_core::{MedicConfig, RecoveryMode, WatchdogAction};
use medic_patch::{PatchEngine, TargetPolicy};
use medic_recovery::{
    CliFixProvider, FailureClassifier, FixProvider, HttpFixProvider, ProviderChain,
    RecoveryOrchestrator,
};
use medic_state::{InstanceLock, RetryLedger};
use medic_supervisor::WorkloadSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "medic")]
#[command(author, version, about = "Supervised recovery for failure-prone workloads")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config for a workload command
    Init {
        /// Workload command to supervise, e.g. "python train.py"
        command: String,
    },

    /// Supervise the configured workload until success or give-up
    Run {
        /// Override the configured recovery mode
        #[arg(long)]
        mode: Option<CliMode>,
    },

    /// Show retry ledger and instance lock state
    Status,
}

/// CLI-friendly recovery mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Normal,
    RestartOnly,
    AnalyzeOnly,
}

impl From<CliMode> for RecoveryMode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::Normal => RecoveryMode::Normal,
            CliMode::RestartOnly => RecoveryMode::RestartOnly,
            CliMode::AnalyzeOnly => RecoveryMode::AnalyzeOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let code = match cli.command {
        Commands::Init { command } => cmd_init(cli.root, command)?,
        Commands::Run { mode } => cmd_run(cli.root, mode).await?,
        Commands::Status => cmd_status(cli.root)?,
    };
    std::process::exit(code);
}

fn cmd_init(root: PathBuf, command: String) -> Result<i32> {
    MedicConfig::write_default(&root, &command).context("Failed to write default config")?;
    println!("Initialized Medic in {:?}", root);
    println!("Created:");
    println!("  .medic/config.toml");
    println!("Edit the config, then start with: medic run");
    Ok(0)
}

async fn cmd_run(root: PathBuf, mode_override: Option<CliMode>) -> Result<i32> {
    let mut config = MedicConfig::load(&root).context("Failed to load .medic/config.toml")?;
    if let Some(mode) = mode_override {
        config.recovery.mode = mode.into();
    }
    if config.workload.root.is_none() {
        config.workload.root = Some(root.clone());
    }

    let workspace = config.root();
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;

    // One supervisor per workspace; stale locks from dead processes are
    // reclaimed inside acquire.
    let _lock = InstanceLock::acquire(state_dir.join("medic.lock"))
        .context("Another medic instance is supervising this workspace")?;

    let ledger = Arc::new(RetryLedger::load_or_default(state_dir.join("state.json"))?);
    let classifier = FailureClassifier::new(Arc::clone(&ledger), config.recovery.clone());

    let policy = TargetPolicy::new(&workspace, &config.patch.allow_globs)?;
    let engine = PatchEngine::new(policy, config.patch.clone(), state_dir.join("backups"));

    let provider = build_provider_chain(&config)?;
    let orchestrator = RecoveryOrchestrator::new(
        classifier,
        provider,
        engine,
        config.recovery.clone(),
        &state_dir,
    );

    let supervisor = WorkloadSupervisor::new(
        &config.workload.command,
        config.workload.args.clone(),
        &workspace,
        config.supervisor.clone(),
    );

    info!(
        "Supervising {:?} {:?} in {:?}",
        config.workload.command, config.workload.args, workspace
    );

    loop {
        let outcome = supervisor.run().await?;

        if outcome.is_success() {
            info!("Workload completed successfully");
            return Ok(0);
        }
        match &outcome.watchdog {
            Some(WatchdogAction::TargetReached) => {
                info!("Pacing target reached, stopping cleanly");
                return Ok(0);
            }
            Some(WatchdogAction::SafetyHalt(reason)) => {
                warn!("Safety halt: {}", reason);
                return Ok(2);
            }
            Some(WatchdogAction::HeartbeatTimeout) | None => {}
        }

        warn!("Workload failed (exit code {:?})", outcome.exit_code);
        if !orchestrator.handle_failure(&outcome).await? {
            warn!(
                "Not recovering; exiting after {}s cooldown",
                config.recovery.cooldown_secs
            );
            tokio::time::sleep(Duration::from_secs(config.recovery.cooldown_secs)).await;
            return Ok(1);
        }

        info!("Recovered, restarting workload");
    }
}

fn cmd_status(root: PathBuf) -> Result<i32> {
    let mut config = MedicConfig::load(&root).context("Failed to load .medic/config.toml")?;
    if config.workload.root.is_none() {
        config.workload.root = Some(root.clone());
    }
    let state_dir = config.state_dir();

    let ledger = RetryLedger::load_or_default(state_dir.join("state.json"))?;
    let (tracked, quarantined) = ledger.summary();
    println!("Workload:    {} {}", config.workload.command, config.workload.args.join(" "));
    println!("Mode:        {:?}", config.recovery.mode);
    println!("Tracked:     {} fingerprint(s)", tracked);
    println!("Quarantined: {} fingerprint(s)", quarantined);

    let lock_path = state_dir.join("medic.lock");
    if lock_path.exists() {
        let holder = std::fs::read_to_string(&lock_path).unwrap_or_default();
        println!("Lock:        held ({})", holder.trim());
    } else {
        println!("Lock:        free");
    }
    Ok(0)
}

fn build_provider_chain(config: &MedicConfig) -> Result<ProviderChain> {
    let primary = build_provider(config, &config.provider.primary)?;
    let fallback = match &config.provider.fallback {
        Some(name) => Some(build_provider(config, name)?),
        None => None,
    };
    Ok(ProviderChain::new(
        primary,
        fallback,
        config.provider.fallback_budget,
    ))
}

fn build_provider(config: &MedicConfig, name: &str) -> Result<Box<dyn FixProvider>> {
    match name {
        "http" => Ok(Box::new(HttpFixProvider::from_config(&config.provider)?)),
        "cli" => Ok(Box::new(CliFixProvider::from_config(&config.provider)?)),
        other => anyhow::bail!("Unknown provider {:?} (expected \"http\" or \"cli\")", other),
    }
}
