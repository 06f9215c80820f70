use anyhow::Context;
use meshpoint::api::create_coordinator_app;
use meshpoint::clock::SystemClock;
use meshpoint::config::Config;
use meshpoint::dispatch::Dispatcher;
use meshpoint::metrics::{init_metrics, start_metrics_exporter};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config.metrics_bind {
        Some(metrics_bind) => {
            let addr: std::net::SocketAddr = metrics_bind
                .parse()
                .context("invalid METRICS_BIND address")?;
            start_metrics_exporter(addr).context("failed to start metrics exporter")?;
            info!(%addr, "metrics exporter listening");
        }
        None => init_metrics(),
    }

    let dispatcher = Arc::new(Dispatcher::new(&config, Arc::new(SystemClock)));

    // Periodic registry sweep. A failed tick is logged; the next proceeds.
    let maintenance = dispatcher.clone();
    let interval = config.maintenance_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // immediate first tick is pointless
        loop {
            tick.tick().await;
            maintenance.run_maintenance();
        }
    });

    let app = create_coordinator_app(dispatcher.clone(), &config);
    let listener = tokio::net::TcpListener::bind(&config.coordinator_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.coordinator_bind))?;

    info!(
        bind = %config.coordinator_bind,
        chunk_support = config.chunk_support,
        environment = ?config.environment,
        "meshpoint coordinator running"
    );
    info!("  WebSocket endpoint:  ws://{}/ws", config.coordinator_bind);
    info!("  Health check:        http://{}/health", config.coordinator_bind);
    if config.allowed_origins.is_empty() {
        warn!("no ALLOWED_ORIGINS configured; browsers cannot connect cross-origin");
    }

    axum::serve(listener, app).await.context("server error")
}
