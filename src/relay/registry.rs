use crate::clock::Clock;
use crate::relay::types::{RelayInfo, RelayOffer, RelayStats, DEFAULT_MAX_CONNECTIONS};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory registry of relay offers.
///
/// Mutated only by the dispatch core, which serializes access; no interior
/// locking here.
pub struct RelayRegistry {
    offers: HashMap<String, RelayOffer>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    /// Offers at or above this load fraction are not selectable.
    load_threshold: f64,
}

impl RelayRegistry {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: i64, load_threshold: f64) -> Self {
        Self {
            offers: HashMap::new(),
            clock,
            ttl_ms,
            load_threshold,
        }
    }

    /// Upsert a relay offer. `connected_count` and `registered_at` survive
    /// re-registration; capacity, key, and freshness are replaced.
    pub fn register(
        &mut self,
        peer_id: &str,
        max_connections: Option<u32>,
        public_key: Option<String>,
    ) {
        let now = self.clock.now_ms();
        let max_connections = max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);

        match self.offers.get_mut(peer_id) {
            Some(offer) => {
                offer.max_connections = max_connections;
                offer.public_key = public_key;
                offer.last_update_ms = now;
            }
            None => {
                self.offers.insert(
                    peer_id.to_string(),
                    RelayOffer {
                        peer_id: peer_id.to_string(),
                        max_connections,
                        connected_count: 0,
                        public_key,
                        registered_at_ms: now,
                        last_update_ms: now,
                    },
                );
                debug!(peer = %peer_id, max_connections, "relay offer registered");
            }
        }
    }

    /// Replace the reported load. No-op for unknown peers.
    pub fn update_load(&mut self, peer_id: &str, connected_count: u32) {
        if let Some(offer) = self.offers.get_mut(peer_id) {
            offer.connected_count = connected_count;
            offer.last_update_ms = self.clock.now_ms();
        }
    }

    /// Refresh liveness without touching the load.
    pub fn touch(&mut self, peer_id: &str) {
        if let Some(offer) = self.offers.get_mut(peer_id) {
            offer.last_update_ms = self.clock.now_ms();
        }
    }

    pub fn unregister(&mut self, peer_id: &str) {
        if self.offers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "relay offer removed");
        }
    }

    /// Up to `count` live offers strictly below the load threshold, excluding
    /// the requester, shuffled uniformly before truncation.
    pub fn get_available_relays(&self, exclude_peer_id: &str, count: usize) -> Vec<RelayInfo> {
        let now = self.clock.now_ms();

        let mut available: Vec<RelayInfo> = self
            .offers
            .values()
            .filter(|offer| offer.last_update_ms + self.ttl_ms > now)
            .filter(|offer| offer.peer_id != exclude_peer_id)
            .filter(|offer| offer.load() < self.load_threshold)
            .map(RelayInfo::from)
            .collect();

        available.shuffle(&mut rand::thread_rng());
        available.truncate(count);
        available
    }

    pub fn stats(&self) -> RelayStats {
        let now = self.clock.now_ms();
        let available = self
            .offers
            .values()
            .filter(|offer| offer.last_update_ms + self.ttl_ms > now)
            .filter(|offer| offer.load() < self.load_threshold)
            .count();

        RelayStats {
            total: self.offers.len(),
            available,
        }
    }

    /// Drop offers whose liveness window has lapsed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let ttl = self.ttl_ms;
        let before = self.offers.len();
        self.offers
            .retain(|_, offer| offer.last_update_ms + ttl > now);
        before - self.offers.len()
    }
}
