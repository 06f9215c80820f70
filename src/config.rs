//! Startup configuration.
//!
//! Everything is read from the environment once at startup; registries and
//! services take the values they need from here. TTLs and caps carry the
//! documented defaults and can be overridden for tests.

use serde::Serialize;
use std::env;
use std::time::Duration;

const HOUR_MS: i64 = 60 * 60 * 1000;
const MINUTE_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Environment {
    Development,
    Production,
}

/// Per-registry expiry windows, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ttls {
    /// Relay offers go stale this long after the last update or heartbeat.
    pub relay_ms: i64,
    /// Daily rendezvous points (straddles the 24 h bucket rollover).
    pub daily_point_ms: i64,
    /// Hourly rendezvous tokens (straddles the 1 h bucket rollover).
    pub hourly_token_ms: i64,
    /// Chunk source entries.
    pub chunk_source_ms: i64,
    /// Cached chunk payloads.
    pub chunk_cache_ms: i64,
    /// Pending chunk requests waiting on a pull.
    pub chunk_pending_ms: i64,
    /// Directory entries without a heartbeat.
    pub directory_ms: i64,
}

impl Default for Ttls {
    fn default() -> Self {
        Self {
            relay_ms: HOUR_MS,
            daily_point_ms: 48 * HOUR_MS,
            hourly_token_ms: 3 * HOUR_MS,
            chunk_source_ms: HOUR_MS,
            chunk_cache_ms: 30 * MINUTE_MS,
            chunk_pending_ms: 5 * MINUTE_MS,
            directory_ms: 5 * MINUTE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub environment: Environment,
    pub log_level: String,
    /// CORS allowlist for the HTTP surfaces. Empty means no cross-origin
    /// access; the directory never serves `*` on authenticated endpoints.
    pub allowed_origins: Vec<String>,
    /// Required bearer for directory write endpoints. `None` leaves writes
    /// open (dev deployments); deletes then fall back to the stored public
    /// key.
    #[serde(skip_serializing)]
    pub server_registry_secret: Option<String>,
    /// Relaxes endpoint validation (loopback/private hosts, non-TLS schemes).
    pub dev_mode: bool,

    pub coordinator_bind: String,
    pub directory_bind: String,
    pub directory_db: String,
    /// Prometheus exporter bind address; disabled when absent.
    pub metrics_bind: Option<String>,

    /// Whether this node serves chunk exchange at all.
    pub chunk_support: bool,
    /// Max cached chunk payloads held at once.
    pub chunk_cache_cap: usize,
    /// A cached chunk is dropped after serving this many requests.
    pub chunk_serve_cap: u32,
    /// Max directory entries.
    pub directory_cap: i64,
    /// A relay is selectable while `connected / max` stays strictly below
    /// this fraction.
    pub relay_load_threshold: f64,
    /// Cadence of the registry maintenance sweep.
    #[serde(skip_serializing)]
    pub maintenance_interval: Duration,

    pub ttls: Ttls,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: "info".to_string(),
            allowed_origins: Vec::new(),
            server_registry_secret: None,
            dev_mode: false,
            coordinator_bind: "0.0.0.0:8080".to_string(),
            directory_bind: "0.0.0.0:8081".to_string(),
            directory_db: "sqlite://meshpoint-directory.db?mode=rwc".to_string(),
            metrics_bind: None,
            chunk_support: true,
            chunk_cache_cap: 1000,
            chunk_serve_cap: 64,
            directory_cap: 1000,
            relay_load_threshold: 0.5,
            maintenance_interval: Duration::from_secs(60),
            ttls: Ttls::default(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("ENVIRONMENT") {
            if value.eq_ignore_ascii_case("production") {
                config.environment = Environment::Production;
            }
        }
        if let Ok(value) = env::var("LOG_LEVEL") {
            if matches!(value.as_str(), "debug" | "info" | "warn" | "error") {
                config.log_level = value;
            }
        }
        if let Ok(value) = env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(value) = env::var("SERVER_REGISTRY_SECRET") {
            if !value.is_empty() {
                config.server_registry_secret = Some(value);
            }
        }
        if let Ok(value) = env::var("DEV_MODE") {
            config.dev_mode = value == "true" || value == "1";
        }
        if let Ok(value) = env::var("COORDINATOR_BIND") {
            config.coordinator_bind = value;
        }
        if let Ok(value) = env::var("DIRECTORY_BIND") {
            config.directory_bind = value;
        }
        if let Ok(value) = env::var("DIRECTORY_DB") {
            config.directory_db = value;
        }
        if let Ok(value) = env::var("METRICS_BIND") {
            if !value.is_empty() {
                config.metrics_bind = Some(value);
            }
        }
        if let Ok(value) = env::var("CHUNK_SUPPORT") {
            config.chunk_support = !(value == "false" || value == "0");
        }
        if let Ok(value) = env::var("CHUNK_CACHE_CAP") {
            if let Ok(cap) = value.parse() {
                config.chunk_cache_cap = cap;
            }
        }

        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Identifier form for audit log lines: masked to `X****Y` in production,
    /// verbatim otherwise.
    pub fn display_id(&self, id: &str) -> String {
        if self.is_production() {
            mask_id(id)
        } else {
            id.to_string()
        }
    }
}

/// Mask an identifier to its first and last character.
pub fn mask_id(id: &str) -> String {
    let mut chars = id.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if id.chars().count() > 2 => {
            format!("{first}****{last}")
        }
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunk_cache_cap, 1000);
        assert_eq!(config.relay_load_threshold, 0.5);
        assert_eq!(config.ttls.daily_point_ms, 48 * HOUR_MS);
        assert_eq!(config.ttls.hourly_token_ms, 3 * HOUR_MS);
        assert_eq!(config.ttls.chunk_cache_ms, 30 * MINUTE_MS);
        assert!(!config.is_production());
    }

    #[test]
    fn test_mask_id() {
        assert_eq!(mask_id("alice-device-7"), "a****7");
        assert_eq!(mask_id("ab"), "****");
        assert_eq!(mask_id(""), "****");
    }

    #[test]
    fn test_display_id_masks_only_in_production() {
        let mut config = Config::default();
        assert_eq!(config.display_id("alice"), "alice");

        config.environment = Environment::Production;
        assert_eq!(config.display_id("alice"), "a****e");
    }
}
