mod config;
mod handlers;
mod state;

use crate::config::MasterConfig;
use crate::state::AppState;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filtro de logs si no se define RUST_LOG.
const DEFAULT_LOG_FILTER: &str = "master=debug,databridge_common=info,tower_http=info,axum=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cfg = MasterConfig::from_env();
    let state = AppState::new(cfg.data_dir.clone());

    // router HTTP
    let app = handlers::build_router(state, cfg.max_upload_bytes);

    let listener = TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", cfg.bind_addr))?;
    info!(
        addr = %listener.local_addr()?,
        data_dir = %cfg.data_dir.display(),
        max_upload_bytes = cfg.max_upload_bytes,
        "master escuchando"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
