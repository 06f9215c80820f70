use crate::chunks::error::{ChunkError, ChunkResult};
use crate::chunks::types::{
    CachedChunk, ChunkAnnouncement, ChunkEvents, ChunkStats, DataSource, PendingRequest,
    RequestOutcome, SourceEntry, MAX_CHUNK_PAYLOAD_BYTES, SERVER_CACHE_ID,
};
use crate::clock::Clock;
use crate::metrics::recorder;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Expiry and capacity knobs for the index.
#[derive(Debug, Clone, Copy)]
pub struct ChunkIndexConfig {
    pub source_ttl_ms: i64,
    pub cache_ttl_ms: i64,
    pub pending_ttl_ms: i64,
    pub cache_cap: usize,
    /// Cached chunks are dropped after this many serves; sources remain, so
    /// the next request falls back to a fresh pull.
    pub serve_cap: u32,
}

/// Availability map, bounded payload cache, and pending-waiter sets.
///
/// Mutated only by the dispatch core, which serializes access. A chunk moves
/// through: announced (live sources) → pulling (waiters parked, one pull in
/// flight) → cached (payload held) → back to announced when the cache copy
/// lapses.
pub struct ChunkIndex {
    sources: HashMap<String, Vec<SourceEntry>>,
    cache: HashMap<String, CachedChunk>,
    pending: HashMap<String, Vec<PendingRequest>>,
    events: Arc<dyn ChunkEvents>,
    clock: Arc<dyn Clock>,
    config: ChunkIndexConfig,
}

impl ChunkIndex {
    pub fn new(
        events: Arc<dyn ChunkEvents>,
        clock: Arc<dyn Clock>,
        config: ChunkIndexConfig,
    ) -> Self {
        Self {
            sources: HashMap::new(),
            cache: HashMap::new(),
            pending: HashMap::new(),
            events,
            clock,
            config,
        }
    }

    /// Upsert source entries for the announcing peer; returns the number
    /// registered. Any announced chunk with parked waiters and no live cache
    /// copy gets an immediate pull back to the announcer.
    pub fn announce(&mut self, peer_id: &str, chunks: &[ChunkAnnouncement]) -> usize {
        let now = self.clock.now_ms();

        for announcement in chunks {
            let entries = self.sources.entry(announcement.chunk_id.clone()).or_default();
            entries.retain(|entry| entry.peer_id != peer_id);
            entries.push(SourceEntry {
                peer_id: peer_id.to_string(),
                routing_hash: announcement.routing_hash.clone(),
                is_cache: false,
                registered_at_ms: now,
                expires_ms: now + self.config.source_ttl_ms,
            });

            let has_waiters = self
                .pending
                .get(&announcement.chunk_id)
                .is_some_and(|waiters| !waiters.is_empty());
            if has_waiters && !self.is_cached(&announcement.chunk_id, now) {
                recorder::record_chunk_pull();
                self.events.send_pull(peer_id, &announcement.chunk_id);
            }
        }

        debug!(peer = %peer_id, count = chunks.len(), "chunk sources announced");
        chunks.len()
    }

    /// Resolve a request: cache hit, park-as-pending with a dispatched pull,
    /// or not-found when no live source exists.
    pub fn request(&mut self, requester_id: &str, chunk_id: &str) -> RequestOutcome {
        let now = self.clock.now_ms();

        if let Some(cached) = self.cache.get_mut(chunk_id) {
            if cached.expires_ms > now {
                cached.access_count += 1;
                let payload = cached.payload.clone();
                if cached.access_count >= self.config.serve_cap {
                    // Serve cap reached; the copy is dropped after this serve.
                    self.cache.remove(chunk_id);
                    recorder::record_cache_eviction();
                }
                recorder::record_cache_hit();
                return RequestOutcome::Data {
                    payload,
                    source: DataSource::Cache,
                };
            }
        }
        recorder::record_cache_miss();

        let live_source = self.sources.get(chunk_id).and_then(|entries| {
            entries
                .iter()
                .filter(|entry| !entry.is_cache)
                .filter(|entry| entry.expires_ms > now)
                .find(|entry| self.events.is_connected(&entry.peer_id))
                .cloned()
        });

        let waiters = self.pending.entry(chunk_id.to_string()).or_default();
        let first_waiter = waiters.is_empty();
        waiters.retain(|waiter| waiter.peer_id != requester_id);
        waiters.push(PendingRequest {
            peer_id: requester_id.to_string(),
            requested_at_ms: now,
        });

        match live_source {
            None => RequestOutcome::NotFound,
            Some(source) => {
                if first_waiter {
                    debug!(chunk = %chunk_id, source = %source.peer_id, "dispatching pull");
                    recorder::record_chunk_pull();
                    self.events.send_pull(&source.peer_id, chunk_id);
                }
                // Otherwise a pull is already in flight; the arriving push
                // serves every waiter at once.
                RequestOutcome::Pending
            }
        }
    }

    /// Admit a pushed payload into the cache, register the coordinator as a
    /// source, and drain the pending set in the same step so no interleaved
    /// request can see the cache but miss the fan-out. Returns the number of
    /// waiters the payload was delivered to.
    pub fn push(&mut self, source_id: &str, chunk_id: &str, payload: &str) -> ChunkResult<usize> {
        let serialized = serde_json::to_string(payload)?.len();
        if serialized > MAX_CHUNK_PAYLOAD_BYTES {
            return Err(ChunkError::PayloadTooLarge {
                actual: serialized,
                limit: MAX_CHUNK_PAYLOAD_BYTES,
            });
        }

        let now = self.clock.now_ms();
        self.admit(chunk_id, payload, now);
        recorder::record_chunk_push();

        let routing_hash = self
            .sources
            .get(chunk_id)
            .and_then(|entries| entries.first())
            .map(|entry| entry.routing_hash.clone())
            .unwrap_or_default();
        let entries = self.sources.entry(chunk_id.to_string()).or_default();
        entries.retain(|entry| entry.peer_id != SERVER_CACHE_ID);
        entries.push(SourceEntry {
            peer_id: SERVER_CACHE_ID.to_string(),
            routing_hash,
            is_cache: true,
            registered_at_ms: now,
            expires_ms: now + self.config.source_ttl_ms,
        });

        let waiters = self.pending.remove(chunk_id).unwrap_or_default();
        let mut delivered = 0;
        for waiter in &waiters {
            if self
                .events
                .send_data(&waiter.peer_id, chunk_id, payload, DataSource::Relay)
            {
                delivered += 1;
            }
        }

        debug!(
            chunk = %chunk_id,
            source = %source_id,
            waiters = waiters.len(),
            delivered,
            "chunk pushed and fanned out"
        );
        Ok(delivered)
    }

    /// Remove every source entry and pending request for the peer; empty
    /// bucket keys are removed.
    pub fn unregister_peer(&mut self, peer_id: &str) {
        self.sources.retain(|_, entries| {
            entries.retain(|entry| entry.peer_id != peer_id);
            !entries.is_empty()
        });
        self.pending.retain(|_, waiters| {
            waiters.retain(|waiter| waiter.peer_id != peer_id);
            !waiters.is_empty()
        });
    }

    /// TTL sweep across all three maps.
    pub fn cleanup(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.sources.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.expires_ms > now);
            removed += before - entries.len();
            !entries.is_empty()
        });

        let cache_before = self.cache.len();
        self.cache.retain(|_, cached| cached.expires_ms > now);
        removed += cache_before - self.cache.len();

        let pending_ttl = self.config.pending_ttl_ms;
        self.pending.retain(|chunk_id, waiters| {
            let before = waiters.len();
            waiters.retain(|waiter| waiter.requested_at_ms + pending_ttl > now);
            if before != waiters.len() {
                warn!(
                    chunk = %chunk_id,
                    dropped = before - waiters.len(),
                    "pending chunk requests expired unserved"
                );
            }
            removed += before - waiters.len();
            !waiters.is_empty()
        });

        removed
    }

    pub fn stats(&self) -> ChunkStats {
        ChunkStats {
            known_chunks: self.sources.len(),
            source_entries: self.sources.values().map(Vec::len).sum(),
            cached_chunks: self.cache.len(),
            pending_requests: self.pending.values().map(Vec::len).sum(),
        }
    }

    fn is_cached(&self, chunk_id: &str, now: i64) -> bool {
        self.cache
            .get(chunk_id)
            .is_some_and(|cached| cached.expires_ms > now)
    }

    /// Cache admission: evict expired entries first, then the oldest by
    /// admission time if still at capacity.
    fn admit(&mut self, chunk_id: &str, payload: &str, now: i64) {
        if !self.cache.contains_key(chunk_id) && self.cache.len() >= self.config.cache_cap {
            let before = self.cache.len();
            self.cache.retain(|_, cached| cached.expires_ms > now);
            let evicted_expired = before - self.cache.len();

            if self.cache.len() >= self.config.cache_cap {
                if let Some(oldest) = self
                    .cache
                    .iter()
                    .min_by_key(|(_, cached)| cached.cached_at_ms)
                    .map(|(id, _)| id.clone())
                {
                    self.cache.remove(&oldest);
                    recorder::record_cache_eviction();
                    debug!(chunk = %oldest, "evicted oldest cached chunk");
                }
            }
            for _ in 0..evicted_expired {
                recorder::record_cache_eviction();
            }
        }

        self.cache.insert(
            chunk_id.to_string(),
            CachedChunk {
                payload: payload.to_string(),
                cached_at_ms: now,
                expires_ms: now + self.config.cache_ttl_ms,
                access_count: 0,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    const MINUTE_MS: i64 = 60 * 1000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Pull { peer: String, chunk: String },
        Data { peer: String, chunk: String, payload: String, source: DataSource },
    }

    /// Records outbound traffic and answers connectivity from a fixed set.
    #[derive(Default)]
    struct FakeEvents {
        connected: Mutex<HashSet<String>>,
        sent: Mutex<Vec<Sent>>,
    }

    impl FakeEvents {
        fn connect(&self, peer: &str) {
            self.connected.lock().insert(peer.to_string());
        }

        fn disconnect(&self, peer: &str) {
            self.connected.lock().remove(peer);
        }

        fn pulls(&self) -> Vec<Sent> {
            self.sent
                .lock()
                .iter()
                .filter(|s| matches!(s, Sent::Pull { .. }))
                .cloned()
                .collect()
        }

        fn data_sends(&self) -> Vec<Sent> {
            self.sent
                .lock()
                .iter()
                .filter(|s| matches!(s, Sent::Data { .. }))
                .cloned()
                .collect()
        }
    }

    impl ChunkEvents for FakeEvents {
        fn send_pull(&self, peer_id: &str, chunk_id: &str) -> bool {
            let connected = self.connected.lock().contains(peer_id);
            self.sent.lock().push(Sent::Pull {
                peer: peer_id.to_string(),
                chunk: chunk_id.to_string(),
            });
            connected
        }

        fn send_data(
            &self,
            peer_id: &str,
            chunk_id: &str,
            payload: &str,
            source: DataSource,
        ) -> bool {
            let connected = self.connected.lock().contains(peer_id);
            if connected {
                self.sent.lock().push(Sent::Data {
                    peer: peer_id.to_string(),
                    chunk: chunk_id.to_string(),
                    payload: payload.to_string(),
                    source,
                });
            }
            connected
        }

        fn is_connected(&self, peer_id: &str) -> bool {
            self.connected.lock().contains(peer_id)
        }
    }

    fn config() -> ChunkIndexConfig {
        ChunkIndexConfig {
            source_ttl_ms: HOUR_MS,
            cache_ttl_ms: 30 * MINUTE_MS,
            pending_ttl_ms: 5 * MINUTE_MS,
            cache_cap: 4,
            serve_cap: 64,
        }
    }

    fn index(clock: Arc<ManualClock>) -> (ChunkIndex, Arc<FakeEvents>) {
        let events = Arc::new(FakeEvents::default());
        let idx = ChunkIndex::new(events.clone(), clock, config());
        (idx, events)
    }

    fn announce_one(idx: &mut ChunkIndex, peer: &str, chunk: &str) {
        idx.announce(
            peer,
            &[ChunkAnnouncement {
                chunk_id: chunk.into(),
                routing_hash: "h".into(),
            }],
        );
    }

    #[test]
    fn test_request_with_no_source_is_not_found_and_parks() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, _) = index(clock);

        assert_eq!(idx.request("s1", "ch_1"), RequestOutcome::NotFound);
        assert_eq!(idx.stats().pending_requests, 1);
    }

    #[test]
    fn test_multicast_single_pull_many_waiters() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("s1");
        events.connect("s2");

        announce_one(&mut idx, "owner", "ch_1");

        assert_eq!(idx.request("s1", "ch_1"), RequestOutcome::Pending);
        assert_eq!(idx.request("s2", "ch_1"), RequestOutcome::Pending);

        // Exactly one pull despite two waiters.
        assert_eq!(
            events.pulls(),
            vec![Sent::Pull {
                peer: "owner".into(),
                chunk: "ch_1".into()
            }]
        );

        let delivered = idx.push("owner", "ch_1", "payload").unwrap();
        assert_eq!(delivered, 2);

        let sends = events.data_sends();
        assert_eq!(sends.len(), 2);
        for send in &sends {
            match send {
                Sent::Data { source, payload, .. } => {
                    assert_eq!(*source, DataSource::Relay);
                    assert_eq!(payload, "payload");
                }
                _ => unreachable!(),
            }
        }

        // Pending drained: nothing further for this push.
        assert_eq!(idx.stats().pending_requests, 0);
    }

    #[test]
    fn test_request_after_push_hits_cache() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("s3");

        announce_one(&mut idx, "owner", "ch_1");
        idx.push("owner", "ch_1", "payload").unwrap();

        assert_eq!(
            idx.request("s3", "ch_1"),
            RequestOutcome::Data {
                payload: "payload".into(),
                source: DataSource::Cache,
            }
        );
        // A cache hit parks nothing.
        assert_eq!(idx.stats().pending_requests, 0);
    }

    #[test]
    fn test_server_cache_source_is_not_pulled() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("owner");
        events.connect("s1");

        announce_one(&mut idx, "owner", "ch_1");
        idx.push("owner", "ch_1", "payload").unwrap();

        // Cache copy lapses; the __server_cache__ source entry is still live
        // but must not be treated as a pullable peer.
        clock.advance(30 * MINUTE_MS);
        events.disconnect("owner");
        events.sent.lock().clear();

        assert_eq!(idx.request("s1", "ch_1"), RequestOutcome::NotFound);
        assert!(events.pulls().is_empty());
    }

    #[test]
    fn test_disconnected_sources_are_skipped() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("live");
        events.connect("s1");

        announce_one(&mut idx, "gone", "ch_1");
        announce_one(&mut idx, "live", "ch_1");

        assert_eq!(idx.request("s1", "ch_1"), RequestOutcome::Pending);
        assert_eq!(
            events.pulls(),
            vec![Sent::Pull {
                peer: "live".into(),
                chunk: "ch_1".into()
            }]
        );
    }

    #[test]
    fn test_announce_with_waiters_triggers_pull() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("s1");

        assert_eq!(idx.request("s1", "ch_1"), RequestOutcome::NotFound);

        events.connect("owner");
        announce_one(&mut idx, "owner", "ch_1");

        assert_eq!(
            events.pulls(),
            vec![Sent::Pull {
                peer: "owner".into(),
                chunk: "ch_1".into()
            }]
        );
    }

    #[test]
    fn test_announce_without_waiters_stays_quiet() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");

        announce_one(&mut idx, "owner", "ch_1");
        assert!(events.pulls().is_empty());
    }

    #[test]
    fn test_reannounce_is_single_entry_and_refreshes_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("p");
        events.connect("s1");

        announce_one(&mut idx, "p", "ch_3");
        clock.advance(50 * MINUTE_MS);
        announce_one(&mut idx, "p", "ch_3");

        assert_eq!(idx.stats().source_entries, 1);

        // Past the original expiry, still available from the refresh.
        clock.advance(20 * MINUTE_MS);
        assert_eq!(idx.request("s1", "ch_3"), RequestOutcome::Pending);
    }

    #[test]
    fn test_push_oversize_payload_rejected() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, _) = index(clock);

        let big = "x".repeat(MAX_CHUNK_PAYLOAD_BYTES);
        let err = idx.push("owner", "ch_1", &big).unwrap_err();
        match err {
            ChunkError::PayloadTooLarge { actual, limit } => {
                assert!(actual > limit);
                assert_eq!(limit, MAX_CHUNK_PAYLOAD_BYTES);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(idx.stats().cached_chunks, 0);
    }

    #[test]
    fn test_cache_at_capacity_evicts_oldest_by_admission() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("reader");

        for i in 0..4 {
            idx.push("owner", &format!("ch_{i}"), "p").unwrap();
            clock.advance(1000);
        }
        assert_eq!(idx.stats().cached_chunks, 4);

        // ch_0 is oldest by admission; access counts are ignored.
        idx.request("reader", "ch_0");

        idx.push("owner", "ch_new", "p").unwrap();
        assert_eq!(idx.stats().cached_chunks, 4);
        assert_eq!(idx.request("reader", "ch_0"), RequestOutcome::NotFound);
        assert!(matches!(
            idx.request("reader", "ch_new"),
            RequestOutcome::Data { .. }
        ));
    }

    #[test]
    fn test_cache_eviction_prefers_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("reader");

        idx.push("owner", "ch_old", "p").unwrap();
        clock.advance(30 * MINUTE_MS); // ch_old expires
        for i in 0..3 {
            idx.push("owner", &format!("ch_{i}"), "p").unwrap();
        }
        idx.push("owner", "ch_new", "p").unwrap();

        // The expired entry made room; the live ones all survive.
        assert!(matches!(idx.request("reader", "ch_0"), RequestOutcome::Data { .. }));
        assert!(matches!(idx.request("reader", "ch_new"), RequestOutcome::Data { .. }));
    }

    #[test]
    fn test_serve_cap_drops_cache_copy_but_keeps_sources() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("reader");

        announce_one(&mut idx, "owner", "ch_1");
        idx.push("owner", "ch_1", "p").unwrap();

        for _ in 0..63 {
            assert!(matches!(
                idx.request("reader", "ch_1"),
                RequestOutcome::Data { .. }
            ));
        }
        // 64th serve reaches the cap; the copy is dropped after serving.
        assert!(matches!(idx.request("reader", "ch_1"), RequestOutcome::Data { .. }));
        assert_eq!(idx.stats().cached_chunks, 0);

        // Sources survive, so the next request re-pulls.
        assert_eq!(idx.request("reader", "ch_1"), RequestOutcome::Pending);
    }

    #[test]
    fn test_expired_cache_entry_never_served() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("reader");

        idx.push("owner", "ch_1", "p").unwrap();
        clock.advance(30 * MINUTE_MS); // expires == now is expired

        assert_eq!(idx.request("reader", "ch_1"), RequestOutcome::NotFound);
    }

    #[test]
    fn test_unregister_peer_scrubs_sources_and_pending() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("s1");

        announce_one(&mut idx, "owner", "ch_1");
        idx.request("s1", "ch_1");

        idx.unregister_peer("owner");
        idx.unregister_peer("s1");

        let stats = idx.stats();
        assert_eq!(stats.source_entries, 0);
        assert_eq!(stats.known_chunks, 0);
        assert_eq!(stats.pending_requests, 0);
    }

    #[test]
    fn test_disconnect_during_pull_strands_waiters_until_sweep() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("owner");
        events.connect("s1");

        announce_one(&mut idx, "owner", "ch_2");
        assert_eq!(idx.request("s1", "ch_2"), RequestOutcome::Pending);

        // Source vanishes before pushing. No retry against other sources.
        events.disconnect("owner");
        idx.unregister_peer("owner");

        assert_eq!(events.data_sends().len(), 0);
        assert_eq!(idx.stats().pending_requests, 1);

        clock.advance(5 * MINUTE_MS);
        idx.cleanup();
        assert_eq!(idx.stats().pending_requests, 0);
    }

    #[test]
    fn test_push_skips_disconnected_waiters() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("s1");
        events.connect("s2");

        announce_one(&mut idx, "owner", "ch_1");
        idx.request("s1", "ch_1");
        idx.request("s2", "ch_1");
        events.disconnect("s1");

        let delivered = idx.push("owner", "ch_1", "p").unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(events.data_sends().len(), 1);
    }

    #[test]
    fn test_duplicate_request_keeps_single_pending_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock);
        events.connect("owner");
        events.connect("s1");

        announce_one(&mut idx, "owner", "ch_1");
        idx.request("s1", "ch_1");
        idx.request("s1", "ch_1");

        assert_eq!(idx.stats().pending_requests, 1);
        // Re-request does not re-pull either.
        assert_eq!(events.pulls().len(), 1);
    }

    #[test]
    fn test_cleanup_sweeps_all_maps() {
        let clock = Arc::new(ManualClock::new(0));
        let (mut idx, events) = index(clock.clone());
        events.connect("s1");

        announce_one(&mut idx, "owner", "ch_1");
        idx.push("owner", "ch_2", "p").unwrap();
        idx.request("s1", "ch_3");

        clock.advance(HOUR_MS);
        let removed = idx.cleanup();
        // __server_cache__ source for ch_2 also lapses at the source TTL.
        assert_eq!(removed, 4);

        let stats = idx.stats();
        assert_eq!(stats.known_chunks, 0);
        assert_eq!(stats.cached_chunks, 0);
        assert_eq!(stats.pending_requests, 0);
    }
}
