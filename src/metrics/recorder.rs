//! Metrics recorder for coordinator operations.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Frame traffic
    describe_counter!(
        "meshpoint_frames_received_total",
        "Total frames received from peers, by kind"
    );
    describe_counter!(
        "meshpoint_frames_sent_total",
        "Total frames sent to peers, by kind"
    );
    describe_counter!(
        "meshpoint_frame_errors_total",
        "Total inbound frames answered with an error frame"
    );
    describe_counter!(
        "meshpoint_send_failures_total",
        "Total outbound frames dropped because the send-handle failed"
    );

    // Chunk index
    describe_counter!("meshpoint_chunk_cache_hits_total", "Chunk requests served from cache");
    describe_counter!("meshpoint_chunk_cache_misses_total", "Chunk requests not in cache");
    describe_counter!("meshpoint_chunk_pulls_total", "chunk_pull frames dispatched to sources");
    describe_counter!("meshpoint_chunk_pushes_total", "Chunk payloads admitted to the cache");
    describe_counter!("meshpoint_chunk_cache_evictions_total", "Cached chunks evicted");

    // Rendezvous
    describe_counter!(
        "meshpoint_rendezvous_matches_total",
        "Match notifications pushed to already-registered peers"
    );

    // Registry gauges, refreshed by the maintenance tick
    describe_gauge!("meshpoint_connected_peers", "Currently connected peers");
    describe_gauge!("meshpoint_relay_offers", "Registered relay offers");
    describe_gauge!("meshpoint_relays_available", "Relay offers below the load threshold");
    describe_gauge!("meshpoint_rendezvous_daily_entries", "Live daily point entries");
    describe_gauge!("meshpoint_rendezvous_hourly_entries", "Live hourly token entries");
    describe_gauge!("meshpoint_chunk_sources", "Live chunk source entries");
    describe_gauge!("meshpoint_chunk_cache_entries", "Cached chunk payloads");
    describe_gauge!("meshpoint_chunk_pending_requests", "Waiters parked on pulls");
}

pub fn record_frame_received(kind: &'static str) {
    counter!("meshpoint_frames_received_total", "kind" => kind).increment(1);
}

pub fn record_frame_sent(kind: &'static str) {
    counter!("meshpoint_frames_sent_total", "kind" => kind).increment(1);
}

pub fn record_frame_error() {
    counter!("meshpoint_frame_errors_total").increment(1);
}

pub fn record_send_failure() {
    counter!("meshpoint_send_failures_total").increment(1);
}

pub fn record_cache_hit() {
    counter!("meshpoint_chunk_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("meshpoint_chunk_cache_misses_total").increment(1);
}

pub fn record_chunk_pull() {
    counter!("meshpoint_chunk_pulls_total").increment(1);
}

pub fn record_chunk_push() {
    counter!("meshpoint_chunk_pushes_total").increment(1);
}

pub fn record_cache_eviction() {
    counter!("meshpoint_chunk_cache_evictions_total").increment(1);
}

pub fn record_rendezvous_match() {
    counter!("meshpoint_rendezvous_matches_total").increment(1);
}

/// Registry-size snapshot pushed by the maintenance tick.
pub fn record_registry_gauges(
    connected_peers: usize,
    relay_total: usize,
    relay_available: usize,
    daily_entries: usize,
    hourly_entries: usize,
    chunk_sources: usize,
    cached_chunks: usize,
    pending_requests: usize,
) {
    gauge!("meshpoint_connected_peers").set(connected_peers as f64);
    gauge!("meshpoint_relay_offers").set(relay_total as f64);
    gauge!("meshpoint_relays_available").set(relay_available as f64);
    gauge!("meshpoint_rendezvous_daily_entries").set(daily_entries as f64);
    gauge!("meshpoint_rendezvous_hourly_entries").set(hourly_entries as f64);
    gauge!("meshpoint_chunk_sources").set(chunk_sources as f64);
    gauge!("meshpoint_chunk_cache_entries").set(cached_chunks as f64);
    gauge!("meshpoint_chunk_pending_requests").set(pending_requests as f64);
}
