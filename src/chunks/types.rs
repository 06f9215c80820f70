//! Chunk index types

use serde::{Deserialize, Serialize};

/// Synthetic peer id under which the coordinator registers its own cached
/// copy as a source.
pub const SERVER_CACHE_ID: &str = "__server_cache__";

/// Hard limit on a pushed payload, measured on its serialized form.
pub const MAX_CHUNK_PAYLOAD_BYTES: usize = 4096;

/// A peer's claim to currently hold a chunk.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub peer_id: String,
    pub routing_hash: String,
    /// Set on the coordinator's own `__server_cache__` entry.
    pub is_cache: bool,
    pub registered_at_ms: i64,
    pub expires_ms: i64,
}

/// A payload held in the store-and-forward cache.
#[derive(Debug, Clone)]
pub struct CachedChunk {
    /// Opaque client-encrypted blob; never interpreted here.
    pub payload: String,
    pub cached_at_ms: i64,
    pub expires_ms: i64,
    pub access_count: u32,
}

/// A requester waiting for a chunk to arrive.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub peer_id: String,
    pub requested_at_ms: i64,
}

/// One `(chunkId, routingHash)` pair from a `chunk_announce` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAnnouncement {
    pub chunk_id: String,
    pub routing_hash: String,
}

/// Where a served payload came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cache,
    Relay,
}

/// Resolution of a `chunk_request` for the requester itself. Pulls to source
/// peers go through [`ChunkEvents`]; this is only the direct answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Cache hit; serve immediately.
    Data { payload: String, source: DataSource },
    /// No live source; requester parked as pending.
    NotFound,
    /// Waiting on an in-flight (or just-dispatched) pull; no immediate reply.
    Pending,
}

/// Outbound capability the index uses to reach peers. The dispatch core
/// supplies the implementation that resolves send-handles; sends report
/// whether the target was still connected.
pub trait ChunkEvents: Send + Sync {
    fn send_pull(&self, peer_id: &str, chunk_id: &str) -> bool;
    fn send_data(&self, peer_id: &str, chunk_id: &str, payload: &str, source: DataSource) -> bool;
    fn is_connected(&self, peer_id: &str) -> bool;
}

/// Index totals for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChunkStats {
    pub known_chunks: usize,
    pub source_entries: usize,
    pub cached_chunks: usize,
    pub pending_requests: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DataSource::Cache).unwrap(), "\"cache\"");
        assert_eq!(serde_json::to_string(&DataSource::Relay).unwrap(), "\"relay\"");
    }

    #[test]
    fn test_announcement_wire_shape() {
        let json = r#"{"chunkId":"ch_1","routingHash":"h"}"#;
        let parsed: ChunkAnnouncement = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.chunk_id, "ch_1");
        assert_eq!(parsed.routing_hash, "h");
    }
}
