use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use anyhow::anyhow;

use callbridge_gateway::{collaborators, routes, AppState, ServerConfig};

/// Call bridge gateway - realtime telephony to AI voice relay
#[derive(Parser, Debug)]
#[command(name = "callbridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the bind host from the environment
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port from the environment
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let address = config.address();
    info!(worker_id = %config.worker_id, "Starting call bridge gateway on {address}");

    // Business collaborators are wired per deployment; the default set
    // answers every tool call with a structured "not configured" error so
    // the gateway still bridges audio.
    let state = AppState::new(&config, collaborators::unconfigured());
    let registry = state.registry.clone();
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Hang up whatever calls are still live before exiting
    for handle in registry.handles() {
        handle.hangup().await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
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
