//! Frame protocol types
//!
//! JSON objects over a bidirectional framed transport. Every frame carries a
//! `type` tag; the request and response sets are closed tagged unions, and an
//! unknown kind is answered with an `error` frame rather than a teardown.

use crate::chunks::{ChunkAnnouncement, DataSource};
use crate::relay::RelayInfo;
use crate::rendezvous::{DeadDrop, LiveMatch};
use serde::{Deserialize, Serialize};

/// Soft limit on an inbound frame's encoded size.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

const MAX_ID_CHARS: usize = 128;

/// Requests peers send to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Register {
        peer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_connections: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },
    UpdateLoad {
        peer_id: String,
        connected_count: u32,
    },
    RegisterRendezvous {
        peer_id: String,
        #[serde(default)]
        daily_points: Vec<String>,
        #[serde(default)]
        hourly_tokens: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dead_drop: Option<String>,
        relay_id: String,
    },
    GetRelays {
        peer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
    },
    Heartbeat {
        peer_id: String,
    },
    Ping,
    ChunkAnnounce {
        peer_id: String,
        chunks: Vec<ChunkAnnouncement>,
    },
    ChunkRequest {
        peer_id: String,
        chunk_id: String,
    },
    ChunkPush {
        peer_id: String,
        chunk_id: String,
        data: String,
    },
}

impl ClientFrame {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Register { .. } => "register",
            ClientFrame::UpdateLoad { .. } => "update_load",
            ClientFrame::RegisterRendezvous { .. } => "register_rendezvous",
            ClientFrame::GetRelays { .. } => "get_relays",
            ClientFrame::Heartbeat { .. } => "heartbeat",
            ClientFrame::Ping => "ping",
            ClientFrame::ChunkAnnounce { .. } => "chunk_announce",
            ClientFrame::ChunkRequest { .. } => "chunk_request",
            ClientFrame::ChunkPush { .. } => "chunk_push",
        }
    }
}

/// Responses and notifications the coordinator sends to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Registered {
        peer_id: String,
        relays: Vec<RelayInfo>,
    },
    LoadUpdated,
    RendezvousResult {
        live_matches: Vec<LiveMatch>,
        dead_drops: Vec<DeadDrop>,
    },
    RendezvousMatch {
        #[serde(rename = "match")]
        match_info: LiveMatch,
    },
    Relays {
        relays: Vec<RelayInfo>,
    },
    HeartbeatAck {
        timestamp: i64,
    },
    Pong,
    ChunkAnnounceAck {
        registered: usize,
    },
    ChunkData {
        chunk_id: String,
        payload: String,
        source: DataSource,
    },
    ChunkNotFound {
        chunk_id: String,
    },
    ChunkPull {
        chunk_id: String,
    },
    ChunkPushAck {
        chunk_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Registered { .. } => "registered",
            ServerFrame::LoadUpdated => "load_updated",
            ServerFrame::RendezvousResult { .. } => "rendezvous_result",
            ServerFrame::RendezvousMatch { .. } => "rendezvous_match",
            ServerFrame::Relays { .. } => "relays",
            ServerFrame::HeartbeatAck { .. } => "heartbeat_ack",
            ServerFrame::Pong => "pong",
            ServerFrame::ChunkAnnounceAck { .. } => "chunk_announce_ack",
            ServerFrame::ChunkData { .. } => "chunk_data",
            ServerFrame::ChunkNotFound { .. } => "chunk_not_found",
            ServerFrame::ChunkPull { .. } => "chunk_pull",
            ServerFrame::ChunkPushAck { .. } => "chunk_push_ack",
            ServerFrame::Error { .. } => "error",
        }
    }
}

/// Peer ids: 1 to 128 chars from `[A-Za-z0-9._-]`.
pub fn is_valid_peer_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_CHARS
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Chunk and server ids: 1 to 128 chars from `[\w:.+/=-]`.
pub fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_CHARS
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '+' | '/' | '=' | '-'))
}
