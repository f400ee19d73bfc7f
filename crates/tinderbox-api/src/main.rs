//! Tinderbox CI server

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tinderbox_api::services::GitHubClient;
use tinderbox_api::{AppState, routes};
use tinderbox_config::load_system_config;
use tinderbox_core::{LogReporter, RemoteRepository, StatusReporter};
use tinderbox_db::{BuildStore, SqliteBuildStore};
use tinderbox_scheduler::{EngineConfig, WorkerPool, queue, recover};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tinderbox-server")]
#[command(about = "Tinderbox CI server", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "TINDERBOX_CONFIG", default_value = "tinderbox.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_system_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    info!(path = %config.database.display(), "Opening build store");
    let store = SqliteBuildStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.display()))?;
    let store: Arc<dyn BuildStore> = Arc::new(store);

    let (reporter, remote) = match &config.github {
        Some(github) => {
            info!(owner = %github.owner, name = %github.name, "Reporting commit statuses to GitHub");
            let client = Arc::new(GitHubClient::new(github, &config.http.hostname));
            let reporter: Arc<dyn StatusReporter> = client.clone();
            let remote: Arc<dyn RemoteRepository> = client;
            (reporter, Some(remote))
        }
        None => {
            info!("No GitHub access configured, commit statuses are only logged");
            let reporter: Arc<dyn StatusReporter> = Arc::new(LogReporter);
            (reporter, None)
        }
    };

    // Workers first, so recovery can hand them a backlog larger than the queue.
    let engine = EngineConfig::from(&config.build);
    let (queue, receiver) = queue::channel(engine.queue_capacity);
    let pool = WorkerPool::start(engine, store.clone(), reporter, receiver)
        .await
        .context("failed to start workers")?;

    let recovered = recover(store.as_ref(), &queue)
        .await
        .context("failed to recover pending builds")?;
    if recovered > 0 {
        info!(count = recovered, "Recovered pending builds");
    }

    let state = AppState::new(store, queue, remote, config.http.clone());
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.http.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http.addr))?;
    info!(
        addr = %config.http.addr,
        webhook = %config.http.webhook_path,
        "Starting server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue handle; workers finish what is queued.
    info!("Server stopped, waiting for queued builds");
    pool.join().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
