//! medialift upload daemon entry point.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use medialift_server::{AppState, Config, router};
use medialift_store::FsUploadStore;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting mediad");

    let config = Config::from_env()?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        max_chunk_bytes = config.max_chunk_bytes,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("mediad shut down cleanly");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = FsUploadStore::new(&config.data_dir).await?;
    let state = AppState::new(Arc::new(store), config.max_chunk_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
        return;
    }
    tracing::info!("shutdown signal received, draining connections");
}
