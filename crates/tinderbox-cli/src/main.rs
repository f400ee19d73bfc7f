//! Tinderbox CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tinderbox_core::BuildId;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tinderbox")]
#[command(about = "Tinderbox CI CLI", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "TINDERBOX_CONFIG", default_value = "tinderbox.kdl")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file, defaults to --config
        path: Option<PathBuf>,
    },
    /// Show a build and its status
    Show {
        /// Build ID
        id: BuildId,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the output of a build
    Logs {
        /// Build ID
        id: BuildId,
        /// Keep printing new output until the build finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// List builds that have not finished
    Pending {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete a build and everything recorded about it
    Purge {
        /// Build ID
        id: BuildId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Validate { path } => {
            let path = path.unwrap_or(cli.config);
            if !commands::validate(&path, &mut out)? {
                std::process::exit(1);
            }
        }
        Commands::Show { id, json } => {
            let store = commands::open_store(&cli.config).await?;
            commands::builds::show(&store, id, json, &mut out).await?;
        }
        Commands::Logs { id, follow } => {
            let store = commands::open_store(&cli.config).await?;
            commands::builds::logs(&store, id, follow, &mut out).await?;
        }
        Commands::Pending { json } => {
            let store = commands::open_store(&cli.config).await?;
            commands::builds::pending(&store, json, &mut out).await?;
        }
        Commands::Purge { id } => {
            let store = commands::open_store(&cli.config).await?;
            commands::builds::purge(&store, id, &mut out).await?;
        }
    }

    Ok(())
}
