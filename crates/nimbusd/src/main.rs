//! nimbusd: the worker-fabric daemon.
//!
//! One process hosts the job executors, the reconciliation workers and
//! the pod log-stream supervisor for every configured zone.

#![forbid(unsafe_code)]

mod config;
mod runtime;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use config::FabricConfig;

#[derive(Parser)]
#[command(name = "nimbusd")]
#[command(about = "Nimbus worker-fabric daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/nimbusd/config.json")]
        config: PathBuf,
    },
    /// Generate a default config file
    InitConfig {
        /// Output path for the config file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("nimbusd=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = FabricConfig::load(&config)?;
            runtime::run(config).await
        }
        Commands::InitConfig { output } => {
            FabricConfig::default().save(&output)?;
            println!("Wrote default config to {}", output.display());
            Ok(())
        }
    }
}
