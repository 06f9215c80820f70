use anyhow::Context;
use meshpoint::clock::SystemClock;
use meshpoint::config::Config;
use meshpoint::directory::{DirectoryApi, DirectoryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.server_registry_secret.is_none() {
        warn!("SERVER_REGISTRY_SECRET not set; directory writes are open");
    }

    let store = Arc::new(
        DirectoryStore::new(
            &config.directory_db,
            Arc::new(SystemClock),
            config.ttls.directory_ms,
            config.directory_cap,
        )
        .await
        .context("failed to open directory database")?,
    );

    // Sweep on the liveness window so stale entries disappear even without
    // read traffic.
    let sweep_store = store.clone();
    let sweep_every = Duration::from_millis(config.ttls.directory_ms as u64);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep_every);
        tick.tick().await;
        loop {
            tick.tick().await;
            match sweep_store.sweep().await {
                Ok(removed) if removed > 0 => info!(removed, "swept stale directory entries"),
                Ok(_) => {}
                Err(err) => error!(error = %err, "directory sweep failed"),
            }
        }
    });

    let app = DirectoryApi::new(store, config.clone()).router();
    let listener = tokio::net::TcpListener::bind(&config.directory_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.directory_bind))?;

    info!(
        bind = %config.directory_bind,
        environment = ?config.environment,
        "meshpoint directory running"
    );
    info!("  POST   /servers            - register coordinator endpoint");
    info!("  GET    /servers            - list live endpoints");
    info!("  POST   /servers/heartbeat  - refresh liveness");
    info!("  DELETE /servers/:id        - remove endpoint");

    axum::serve(listener, app).await.context("server error")
}
