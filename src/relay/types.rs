//! Relay registry types

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// A peer's standing offer to relay traffic for others.
#[derive(Debug, Clone)]
pub struct RelayOffer {
    pub peer_id: String,

    /// Advertised connection capacity.
    pub max_connections: u32,

    /// Load as last reported by the peer.
    pub connected_count: u32,

    pub public_key: Option<String>,

    /// First registration; preserved across re-registrations.
    pub registered_at_ms: i64,

    /// Refreshed by re-registration, load updates, and heartbeats.
    pub last_update_ms: i64,
}

impl RelayOffer {
    /// Load fraction, saturating to full when no capacity is advertised.
    pub fn load(&self) -> f64 {
        if self.max_connections == 0 {
            return 1.0;
        }
        f64::from(self.connected_count) / f64::from(self.max_connections)
    }
}

/// Wire-facing view of a selectable relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    pub peer_id: String,
    pub max_connections: u32,
    pub connected_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl From<&RelayOffer> for RelayInfo {
    fn from(offer: &RelayOffer) -> Self {
        Self {
            peer_id: offer.peer_id.clone(),
            max_connections: offer.max_connections,
            connected_count: offer.connected_count,
            public_key: offer.public_key.clone(),
        }
    }
}

/// Registry totals for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelayStats {
    pub total: usize,
    pub available: usize,
}
