//! IL Shield compute worker binary

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ilshield_worker::{router, AppState, WorkerConfig, WORKER_VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting IL Shield compute worker v{}", WORKER_VERSION);

    let config = WorkerConfig::load()?;
    let identity = config.identity()?;
    if config.seed.is_none() {
        info!("No ILSHIELD_WORKER_SEED set, using an ephemeral key");
    }

    let state = AppState::new(identity);
    info!(worker_id = %state.worker_id(), "Worker identity loaded");

    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Compute worker listening on {}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Compute worker stopped");
    Ok(())
}
