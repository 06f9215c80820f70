use crate::clock::Clock;
use crate::rendezvous::types::{
    DailyEntry, DeadDrop, HourlyEntry, LiveMatch, MatchNotifier, RendezvousStats,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Time-bucketed meeting-point index.
///
/// Keys are opaque hashes supplied by peers; the registry stores them as-is
/// and performs no hashing of its own. Expired entries are filtered at read
/// time as well as swept, so a stale entry is never returned.
pub struct RendezvousRegistry {
    daily: HashMap<String, Vec<DailyEntry>>,
    hourly: HashMap<String, Vec<HourlyEntry>>,
    notifier: Arc<dyn MatchNotifier>,
    clock: Arc<dyn Clock>,
    daily_ttl_ms: i64,
    hourly_ttl_ms: i64,
}

impl RendezvousRegistry {
    pub fn new(
        notifier: Arc<dyn MatchNotifier>,
        clock: Arc<dyn Clock>,
        daily_ttl_ms: i64,
        hourly_ttl_ms: i64,
    ) -> Self {
        Self {
            daily: HashMap::new(),
            hourly: HashMap::new(),
            notifier,
            clock,
            daily_ttl_ms,
            hourly_ttl_ms,
        }
    }

    /// For each point: collect other peers' live dead drops, then upsert the
    /// caller's own entry. A peer never receives its own drop, and
    /// re-registering a point replaces the prior entry.
    pub fn register_daily_points(
        &mut self,
        peer_id: &str,
        points: &[String],
        dead_drop: Option<&str>,
        relay_id: &str,
    ) -> Vec<DeadDrop> {
        let now = self.clock.now_ms();
        let mut drops = Vec::new();

        for point in points {
            let entries = self.daily.entry(point.clone()).or_default();

            for entry in entries.iter() {
                if entry.peer_id == peer_id || entry.expires_ms <= now {
                    continue;
                }
                if let Some(payload) = &entry.dead_drop {
                    drops.push(DeadDrop {
                        peer_id: entry.peer_id.clone(),
                        dead_drop: payload.clone(),
                        relay_id: entry.relay_id.clone(),
                    });
                }
            }

            entries.retain(|entry| entry.peer_id != peer_id);
            entries.push(DailyEntry {
                peer_id: peer_id.to_string(),
                relay_id: relay_id.to_string(),
                dead_drop: dead_drop.map(str::to_string),
                registered_at_ms: now,
                expires_ms: now + self.daily_ttl_ms,
            });
        }

        debug!(
            peer = %peer_id,
            points = points.len(),
            drops = drops.len(),
            "daily points registered"
        );
        drops
    }

    /// For each token: collect other live entries as matches, notify each of
    /// them about the arrival, then upsert the caller's own entry. Matching
    /// is bidirectional: the caller gets the result list, the residents get
    /// a pushed match event.
    pub fn register_hourly_tokens(
        &mut self,
        peer_id: &str,
        tokens: &[String],
        relay_id: &str,
    ) -> Vec<LiveMatch> {
        let now = self.clock.now_ms();
        let mut matches = Vec::new();

        for token in tokens {
            let entries = self.hourly.entry(token.clone()).or_default();

            for entry in entries.iter() {
                if entry.peer_id == peer_id || entry.expires_ms <= now {
                    continue;
                }
                matches.push(LiveMatch {
                    peer_id: entry.peer_id.clone(),
                    relay_id: entry.relay_id.clone(),
                });
                self.notifier.notify_match(
                    &entry.peer_id,
                    LiveMatch {
                        peer_id: peer_id.to_string(),
                        relay_id: relay_id.to_string(),
                    },
                );
            }

            entries.retain(|entry| entry.peer_id != peer_id);
            entries.push(HourlyEntry {
                peer_id: peer_id.to_string(),
                relay_id: relay_id.to_string(),
                registered_at_ms: now,
                expires_ms: now + self.hourly_ttl_ms,
            });
        }

        debug!(
            peer = %peer_id,
            tokens = tokens.len(),
            matches = matches.len(),
            "hourly tokens registered"
        );
        matches
    }

    /// Scrub every daily and hourly entry for the peer.
    pub fn unregister_peer(&mut self, peer_id: &str) {
        self.daily.retain(|_, entries| {
            entries.retain(|entry| entry.peer_id != peer_id);
            !entries.is_empty()
        });
        self.hourly.retain(|_, entries| {
            entries.retain(|entry| entry.peer_id != peer_id);
            !entries.is_empty()
        });
    }

    /// Sweep expired entries; bucket keys left empty are removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.daily.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.expires_ms > now);
            removed += before - entries.len();
            !entries.is_empty()
        });
        self.hourly.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.expires_ms > now);
            removed += before - entries.len();
            !entries.is_empty()
        });

        removed
    }

    pub fn stats(&self) -> RendezvousStats {
        RendezvousStats {
            daily_points: self.daily.len(),
            daily_entries: self.daily.values().map(Vec::len).sum(),
            hourly_tokens: self.hourly.len(),
            hourly_entries: self.hourly.values().map(Vec::len).sum(),
        }
    }
}
