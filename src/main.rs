use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use shard_router::api::handlers::AppState;
use shard_router::api::routes::create_router;
use shard_router::config::{load_rules, Config};
use shard_router::services::{ShardingKernel, SnapshotHolder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    let database_type = config.database_type()?;
    info!(
        "Starting shard router for {} on {}",
        database_type,
        config.server_address()
    );

    // Load sharding rules
    let (rule, schema) = load_rules(&config.rules.path).map_err(|e| {
        error!("Failed to load sharding rules: {:#}", e);
        e
    })?;
    let kernel = Arc::new(ShardingKernel::new(Arc::new(SnapshotHolder::new(rule, schema))));

    // Create router with state
    let app: Router = create_router(AppState {
        kernel,
        config: config.clone(),
    });

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
