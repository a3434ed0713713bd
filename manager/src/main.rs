//! Main entry point for the fleet manager binary
//!
//! `run` supervises the persisted fleet until Ctrl+C; the other subcommands
//! are one-shot maintenance operations against the same application tree.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

use manager::{DefaultFleetManager, ManagerConfig, RestartMode};
use shared::{fleet_info, fleet_warn, logging, Component};

/// Lifecycle coordinator and self-updater for a fleet of bot workers
#[derive(Parser)]
#[command(name = "manager")]
#[command(about = "Runs a fleet of bot workers and updates the application tree in place")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Application directory to manage (defaults to FLEET_APP_DIR, then the current directory)
    #[arg(long)]
    pub app_dir: Option<PathBuf>,

    /// Restart hand-off: exit, exit:<code>, signal or command:<program> [args..]
    #[arg(long)]
    pub restart_mode: Option<RestartMode>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start persisted workers and supervise them until Ctrl+C
    Run,
    /// Compare the local revision with the remote one
    Check,
    /// Run a full update cycle
    Update,
    /// List stored backups, newest first
    Backups,
    /// Delete old backups
    Cleanup {
        /// Number of newest backups to keep
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Restore files and worker configurations from a backup
    Restore {
        /// Backup identifier, e.g. backup_20250101_120000_000
        backup_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ManagerConfig::from_env_with(args.app_dir).context("loading configuration")?;
    if let Some(mode) = args.restart_mode {
        config.restart_mode = mode;
    }
    logging::init_tracing(Some(args.log_level.as_str()), config.log_file.as_deref()).context("initializing logging")?;

    let keep_default = config.keep_backups;
    let restart_delay = config.restart_delay;
    let fleet = DefaultFleetManager::from_config(config);

    match args.command {
        Command::Run => run(&fleet).await?,
        Command::Check => {
            let check = fleet.check_for_updates().await?;
            println!("{}", check.message);
            for line in &check.change_log {
                println!("  {line}");
            }
        }
        Command::Update => {
            // Workers are only loaded; the relaunched process starts them
            let outcome = fleet.trigger_offline_update().await?;
            println!("{}", outcome.message);
            if !outcome.success {
                anyhow::bail!("update did not complete");
            }
            // The restart hand-off fires on a background task after the delay
            tokio::time::sleep(restart_delay + Duration::from_secs(1)).await;
        }
        Command::Backups => {
            let backups = fleet.list_backups().await?;
            if backups.is_empty() {
                println!("No backups");
            }
            for backup in backups {
                println!(
                    "{}  {}  {} files  {} bytes  {}",
                    backup.id,
                    backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                    backup.files_count,
                    backup.size_bytes,
                    backup.commit_hash.as_deref().map(manager::updater::short_ref).unwrap_or_default()
                );
            }
        }
        Command::Cleanup { keep } => {
            let report = fleet.cleanup_old_backups(keep.unwrap_or(keep_default)).await?;
            println!("{}", report.message);
        }
        Command::Restore { backup_id } => {
            fleet.load().await?;
            let snapshot = fleet
                .restore_backup(&backup_id)
                .await
                .with_context(|| format!("restoring {backup_id}"))?;
            println!("Restored {} ({} files)", snapshot.id, snapshot.file_manifest.len());
        }
    }

    Ok(())
}

async fn run(fleet: &DefaultFleetManager) -> anyhow::Result<()> {
    logging::log_startup(Component::Manager, "bot fleet manager");

    let started = fleet.start_autostart().await.context("loading persisted workers")?;
    fleet_info!(Component::Manager, "🤖 {} workers running", started.len());

    match signal::ctrl_c().await {
        Ok(()) => logging::log_shutdown(Component::Manager, "Received Ctrl+C signal"),
        Err(err) => logging::log_error(Component::Manager, "Signal handling", &err),
    }

    let report = fleet.shutdown().await.context("shutting down workers")?;
    if report.success {
        logging::log_success(Component::Manager, &report.message);
    } else {
        fleet_warn!(Component::Manager, "⚠️ {}", report.message);
    }
    Ok(())
}
