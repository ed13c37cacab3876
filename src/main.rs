use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

mod api;
mod config;
mod models;
mod services;
mod storage;
mod validation;

use config::Config;
use services::FederationService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        "Loaded {} source(s), local store at {}",
        config.sources.len(),
        config.store.path
    );

    // Initialize the federation pipeline and the embedded store
    let service = Arc::new(FederationService::new(&config).map_err(|e| {
        error!("Failed to initialize federation service: {}", e);
        e
    })?);

    // Create router with state
    let app: Router = api::routes::create_router(service);

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
