use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jarctl_core::ManagerConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::server::ServerCommand;

#[derive(Parser)]
#[command(name = "jarctl", version)]
#[command(about = "Install, run and back up a self-hosted Java server", long_about = None)]
struct Cli {
    /// Config file (defaults to $JARCTL_CONFIG, then /etc/jarctl/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep every managed file beneath this directory instead of system paths
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install this binary as a system-wide command
    Setup,
    /// Remove the system-wide command
    Remove,
    /// Print the jarctl version
    Version,
    /// Replace this binary with the latest published release
    SelfUpdate,
    /// Manage the Java server
    Server {
        #[command(subcommand)]
        command: ServerCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = resolve_config(cli.config.as_ref(), cli.root.as_ref())?;

    match cli.command {
        Commands::Setup => commands::setup::install_shim(&config),
        Commands::Remove => commands::setup::remove_shim(&config),
        Commands::Version => {
            println!("jarctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::SelfUpdate => commands::self_update::exec(&config).await,
        Commands::Server { command } => commands::server::exec(config, command).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn resolve_config(path: Option<&PathBuf>, root: Option<&PathBuf>) -> Result<ManagerConfig> {
    let config = match path {
        Some(path) => ManagerConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ManagerConfig::load().context("Failed to load config")?,
    };
    Ok(match root {
        Some(root) => config.rebased(root),
        None => config,
    })
}
