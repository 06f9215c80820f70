//! Connection table
//!
//! Maps each bound peer id to the send-handle of its live connection. The
//! handle is the only escape of the transport from the dispatch core: frames
//! move in, nothing aliases the socket. The table also implements the
//! notifier capabilities the registries were constructed with, so an
//! asynchronous match or pull resolves its target's handle here.

use crate::chunks::{ChunkEvents, DataSource};
use crate::dispatch::types::ServerFrame;
use crate::metrics::recorder;
use crate::rendezvous::{LiveMatch, MatchNotifier};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Outbound frames buffered per connection before the writer drains them.
pub const SEND_QUEUE_DEPTH: usize = 256;

struct ConnectionHandle {
    connection_id: Uuid,
    tx: mpsc::Sender<ServerFrame>,
}

#[derive(Default)]
pub struct ConnectionTable {
    peers: DashMap<String, ConnectionHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a peer id to a connection, replacing any prior binding (a peer
    /// reconnecting supersedes its old socket).
    pub fn bind(&self, peer_id: &str, connection_id: Uuid, tx: mpsc::Sender<ServerFrame>) {
        self.peers
            .insert(peer_id.to_string(), ConnectionHandle { connection_id, tx });
    }

    /// Whether this connection still owns the peer's binding. False once a
    /// newer connection has re-registered the same peer id.
    pub fn owns(&self, peer_id: &str, connection_id: Uuid) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|handle| handle.connection_id == connection_id)
    }

    pub fn unbind(&self, peer_id: &str) {
        self.peers.remove(peer_id);
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Push a frame to a peer. A failed or missing handle is logged and
    /// reported to the caller; it never propagates.
    pub fn send(&self, peer_id: &str, frame: ServerFrame) -> bool {
        let kind = frame.kind();
        let Some(handle) = self.peers.get(peer_id) else {
            return false;
        };

        match handle.tx.try_send(frame) {
            Ok(()) => {
                recorder::record_frame_sent(kind);
                true
            }
            Err(err) => {
                recorder::record_send_failure();
                warn!(peer = %peer_id, kind, error = %err, "dropping outbound frame");
                false
            }
        }
    }
}

impl MatchNotifier for ConnectionTable {
    fn notify_match(&self, target_peer_id: &str, arrival: LiveMatch) {
        recorder::record_rendezvous_match();
        self.send(
            target_peer_id,
            ServerFrame::RendezvousMatch {
                match_info: arrival,
            },
        );
    }
}

impl ChunkEvents for ConnectionTable {
    fn send_pull(&self, peer_id: &str, chunk_id: &str) -> bool {
        self.send(
            peer_id,
            ServerFrame::ChunkPull {
                chunk_id: chunk_id.to_string(),
            },
        )
    }

    fn send_data(&self, peer_id: &str, chunk_id: &str, payload: &str, source: DataSource) -> bool {
        self.send(
            peer_id,
            ServerFrame::ChunkData {
                chunk_id: chunk_id.to_string(),
                payload: payload.to_string(),
                source,
            },
        )
    }

    fn is_connected(&self, peer_id: &str) -> bool {
        ConnectionTable::is_connected(self, peer_id)
    }
}
