use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use clap::Subcommand;
use dialoguer::{Input, theme::ColorfulTheme};
use jarctl_core::backup::{DEFAULT_BACKUP_NAME, validate_name};
use jarctl_core::{
    BackupManager, HttpReleaseSource, LifecycleManager, ManagerConfig, ServerStatus,
    SystemSupervisor, UpdateOutcome,
};
use tracing::warn;

#[derive(Subcommand)]
pub enum ServerCommand {
    /// Create the service account, download the latest release and write default config
    Install,
    /// Stop the server and remove everything install created (backups are kept)
    Uninstall,
    /// Start the server in the background
    Start,
    /// Ask the server to shut down gracefully
    Stop,
    /// Stop (if running) and start again
    Restart,
    /// Print online or offline
    Status,
    /// Download a newer release if upstream has one
    Update,
    /// Copy the data directory into a new timestamped backup
    Backup {
        /// Letters, digits and '-' only; prompted for when omitted
        name: Option<String>,
    },
    /// Replace the data directory with a backup, by full name or unique prefix
    Restore { name: String },
    /// List backups, newest first
    Backups,
}

pub async fn exec(config: ManagerConfig, command: ServerCommand) -> Result<()> {
    let releases = HttpReleaseSource::for_server(&config)?;
    let manager = LifecycleManager::new(config, SystemSupervisor, releases);

    match command {
        ServerCommand::Install => {
            let record = manager.install().await?;
            println!(
                "Installed {} ({}) at {}",
                record.artifact_name,
                record.artifact_version,
                record.artifact_path.display()
            );
        }
        ServerCommand::Uninstall => {
            manager.uninstall().await?;
            println!("Server uninstalled.");
        }
        ServerCommand::Start => {
            let pid = manager.start()?;
            println!("Server started (pid {pid}).");
        }
        ServerCommand::Stop => {
            let pid = manager.stop().await?;
            println!("Server stopped (pid {pid}).");
        }
        ServerCommand::Restart => {
            let pid = manager.restart().await?;
            println!("Server restarted (pid {pid}).");
        }
        ServerCommand::Status => match manager.status()? {
            ServerStatus::Online { pid } => println!("online (pid {pid})"),
            status @ ServerStatus::Offline => println!("{status}"),
        },
        ServerCommand::Update => match manager.update().await? {
            UpdateOutcome::AlreadyCurrent { version } => {
                warn!("No update available; {version} is already installed.");
            }
            UpdateOutcome::Updated {
                from,
                to,
                server_running,
                ..
            } => {
                println!("Updated {from} -> {to}.");
                if server_running {
                    println!("Run `jarctl server restart` to switch to the new release.");
                }
            }
        },
        ServerCommand::Backup { name } => {
            let name = resolve_backup_name(name)?;
            let backup = BackupManager::new(&manager).backup(Some(&name)).await?;
            println!("{}", backup.id);
        }
        ServerCommand::Restore { name } => {
            let report = BackupManager::new(&manager).restore(&name).await?;
            println!(
                "Restored {} and started the server (pid {}).",
                report.backup.id, report.started_pid
            );
        }
        ServerCommand::Backups => {
            let backups = BackupManager::new(&manager).list()?;
            if backups.is_empty() {
                println!("No backups.");
            }
            for backup in backups {
                println!("{}", backup.id);
            }
        }
    }

    Ok(())
}

fn resolve_backup_name(name: Option<String>) -> Result<String> {
    if let Some(value) = name.map(|value| value.trim().to_string()) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Ok(DEFAULT_BACKUP_NAME.to_string());
    }

    Input::<String>::with_theme(&ColorfulTheme::default())
        .with_prompt("Backup name")
        .default(DEFAULT_BACKUP_NAME.to_string())
        .validate_with(|input: &String| validate_name(input).map_err(|err| err.to_string()))
        .interact_text()
        .context("Failed to read backup name")
}
