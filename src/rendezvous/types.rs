//! Rendezvous registry types

use serde::{Deserialize, Serialize};

/// One peer's presence at a daily rendezvous point, with an optional
/// encrypted dead drop for whoever shares the secret.
#[derive(Debug, Clone)]
pub struct DailyEntry {
    pub peer_id: String,
    pub relay_id: String,
    /// Opaque client-encrypted payload; never interpreted here.
    pub dead_drop: Option<String>,
    pub registered_at_ms: i64,
    pub expires_ms: i64,
}

/// One peer's presence at an hourly rendezvous token.
#[derive(Debug, Clone)]
pub struct HourlyEntry {
    pub peer_id: String,
    pub relay_id: String,
    pub registered_at_ms: i64,
    pub expires_ms: i64,
}

/// Dead drop retrieved for a caller from another peer at the same point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeadDrop {
    pub peer_id: String,
    pub dead_drop: String,
    pub relay_id: String,
}

/// A currently-registered peer at a colliding token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LiveMatch {
    pub peer_id: String,
    pub relay_id: String,
}

/// Capability for pushing a match event to an already-registered peer when a
/// newcomer collides with its token. The dispatch core supplies the
/// implementation that resolves the target's send-handle.
pub trait MatchNotifier: Send + Sync {
    fn notify_match(&self, target_peer_id: &str, arrival: LiveMatch);
}

/// Registry totals for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RendezvousStats {
    pub daily_points: usize,
    pub daily_entries: usize,
    pub hourly_tokens: usize,
    pub hourly_entries: usize,
}
