use crate::api::cors_layer;
use crate::config::Config;
use crate::directory::error::{DirectoryError, DirectoryResult};
use crate::directory::store::DirectoryStore;
use crate::directory::types::{
    HeartbeatRequest, RegisterServerRequest, ServerEntry, ServerListResponse,
};
use crate::dispatch::is_valid_resource_id;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::{Host, Url};

const MAX_ENDPOINT_CHARS: usize = 2048;
const MAX_PUBLIC_KEY_CHARS: usize = 1024;
const MAX_REGION_CHARS: usize = 64;

#[derive(Clone)]
struct AppState {
    store: Arc<DirectoryStore>,
    config: Arc<Config>,
}

pub struct DirectoryApi {
    store: Arc<DirectoryStore>,
    config: Arc<Config>,
}

impl DirectoryApi {
    pub fn new(store: Arc<DirectoryStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_check))
            .route("/servers", post(register_server).get(list_servers))
            .route("/servers/heartbeat", post(heartbeat))
            .route("/servers/:id", delete(delete_server))
            .with_state(AppState {
                store: self.store.clone(),
                config: self.config.clone(),
            })
            .layer(TraceLayer::new_for_http());

        if let Some(cors) = cors_layer(&self.config) {
            router = router.layer(cors);
        }
        router
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn register_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterServerRequest>,
) -> DirectoryResult<(StatusCode, Json<ServerEntry>)> {
    require_secret(&state.config, &headers, "register")?;
    validate_register(&req, state.config.dev_mode)?;

    let entry = state.store.upsert(&req).await?;
    info!(
        target: "audit",
        server = %state.config.display_id(&req.server_id),
        "directory entry registered"
    );
    Ok((StatusCode::OK, Json(entry)))
}

async fn list_servers(State(state): State<AppState>) -> DirectoryResult<Json<ServerListResponse>> {
    let servers = state.store.list_live().await?;
    Ok(Json(ServerListResponse { servers }))
}

async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> DirectoryResult<Json<ServerListResponse>> {
    require_secret(&state.config, &headers, "heartbeat")?;

    let servers = state.store.heartbeat(&req.server_id).await?;
    Ok(Json(ServerListResponse { servers }))
}

async fn delete_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(server_id): Path<String>,
) -> DirectoryResult<StatusCode> {
    match &state.config.server_registry_secret {
        Some(_) => require_secret(&state.config, &headers, "delete")?,
        // Without a shared secret, a delete must prove ownership by echoing
        // the stored public key as its bearer.
        None => {
            if let Some(entry) = state.store.get(&server_id).await? {
                let authorized = match (&entry.public_key, bearer_token(&headers)) {
                    (Some(public_key), Some(token)) => secrets_equal(public_key, token),
                    _ => false,
                };
                if !authorized {
                    warn!(
                        target: "audit",
                        server = %state.config.display_id(&server_id),
                        "unauthorized directory delete"
                    );
                    return Err(DirectoryError::Unauthorized);
                }
            }
        }
    }

    state.store.delete(&server_id).await?;
    info!(
        target: "audit",
        server = %state.config.display_id(&server_id),
        "directory entry deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Constant-time secret comparison: hash both sides, compare the digests
/// (`blake3::Hash` equality is constant-time).
pub fn secrets_equal(a: &str, b: &str) -> bool {
    blake3::hash(a.as_bytes()) == blake3::hash(b.as_bytes())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn require_secret(config: &Config, headers: &HeaderMap, action: &str) -> DirectoryResult<()> {
    let Some(secret) = &config.server_registry_secret else {
        return Ok(());
    };

    match bearer_token(headers) {
        Some(token) if secrets_equal(token, secret) => Ok(()),
        _ => {
            warn!(target: "audit", action, "rejected directory write with bad bearer");
            Err(DirectoryError::Unauthorized)
        }
    }
}

fn validate_register(req: &RegisterServerRequest, dev_mode: bool) -> DirectoryResult<()> {
    if !is_valid_resource_id(&req.server_id) {
        return Err(DirectoryError::Validation("Invalid serverId".to_string()));
    }
    if req.endpoint.len() > MAX_ENDPOINT_CHARS {
        return Err(DirectoryError::Validation("Endpoint too long".to_string()));
    }
    validate_endpoint(&req.endpoint, dev_mode)?;

    if let Some(public_key) = &req.public_key {
        if public_key.len() > MAX_PUBLIC_KEY_CHARS {
            return Err(DirectoryError::Validation("publicKey too long".to_string()));
        }
    }
    if let Some(region) = &req.region {
        let valid = !region.is_empty()
            && region.len() <= MAX_REGION_CHARS
            && region
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(DirectoryError::Validation("Invalid region".to_string()));
        }
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str, dev_mode: bool) -> DirectoryResult<()> {
    let url = Url::parse(endpoint)
        .map_err(|_| DirectoryError::Validation("Invalid endpoint URL".to_string()))?;

    match url.scheme() {
        "https" | "wss" => {}
        "http" | "ws" if dev_mode => {}
        _ => {
            return Err(DirectoryError::Validation(
                "Endpoint scheme must be https or wss".to_string(),
            ))
        }
    }

    let host = url
        .host()
        .ok_or_else(|| DirectoryError::Validation("Endpoint must have a host".to_string()))?;

    if !dev_mode && !is_public_host(&host) {
        return Err(DirectoryError::Validation(
            "Endpoint host must be publicly routable".to_string(),
        ));
    }
    Ok(())
}

fn is_public_host(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(ip) => {
            !(ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified())
        }
        Host::Ipv6(ip) => {
            let segments = ip.segments();
            let unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let link_local = (segments[0] & 0xffc0) == 0xfe80;
            !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
        }
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.');
            !(domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost"))
        }
    }
}
