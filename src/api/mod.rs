mod websocket;

pub use websocket::websocket_handler;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Assemble the coordinator's HTTP surface: health probe plus the WebSocket
/// endpoint carrying the frame protocol.
pub fn create_coordinator_app(dispatcher: Arc<Dispatcher>, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .with_state(dispatcher)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(config) {
        router = router.layer(cors);
    }
    router
}

async fn health_check() -> &'static str {
    "OK"
}

/// CORS from the configured allowlist. No allowlist, no cross-origin access;
/// a wildcard is never served.
pub(crate) fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return None;
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ]),
    )
}
