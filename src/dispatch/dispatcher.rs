use crate::chunks::{ChunkIndex, ChunkIndexConfig, ChunkStats, RequestOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::dispatch::connections::{ConnectionTable, SEND_QUEUE_DEPTH};
use crate::dispatch::error::{DispatchError, DispatchResult};
use crate::dispatch::types::{
    is_valid_peer_id, is_valid_resource_id, ClientFrame, ServerFrame, MAX_FRAME_BYTES,
};
use crate::metrics::recorder;
use crate::relay::{RelayRegistry, RelayStats};
use crate::rendezvous::{RendezvousRegistry, RendezvousStats};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Relays handed back with a `registered` or default `get_relays` response.
const DEFAULT_RELAY_COUNT: usize = 10;

/// The registry aggregate. One lock over the whole set; operations routinely
/// touch several registries, disconnect most of all.
struct Registries {
    relays: RelayRegistry,
    rendezvous: RendezvousRegistry,
    chunks: Option<ChunkIndex>,
}

/// Per-connection dispatch state held by the transport task. The peer id is
/// unbound until the first `register`.
pub struct PeerConnection {
    pub connection_id: Uuid,
    pub peer_id: Option<String>,
    tx: mpsc::Sender<ServerFrame>,
}

/// The message router: decodes typed requests, mutates the registries, and
/// emits responses to the originating peer and notifications to others.
pub struct Dispatcher {
    registries: Mutex<Registries>,
    connections: Arc<ConnectionTable>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let connections = Arc::new(ConnectionTable::new());

        let relays = RelayRegistry::new(
            clock.clone(),
            config.ttls.relay_ms,
            config.relay_load_threshold,
        );
        let rendezvous = RendezvousRegistry::new(
            connections.clone(),
            clock.clone(),
            config.ttls.daily_point_ms,
            config.ttls.hourly_token_ms,
        );
        let chunks = config.chunk_support.then(|| {
            ChunkIndex::new(
                connections.clone(),
                clock.clone(),
                ChunkIndexConfig {
                    source_ttl_ms: config.ttls.chunk_source_ms,
                    cache_ttl_ms: config.ttls.chunk_cache_ms,
                    pending_ttl_ms: config.ttls.chunk_pending_ms,
                    cache_cap: config.chunk_cache_cap,
                    serve_cap: config.chunk_serve_cap,
                },
            )
        });

        Self {
            registries: Mutex::new(Registries {
                relays,
                rendezvous,
                chunks,
            }),
            connections,
            clock,
        }
    }

    /// Attach a new connection: hands the transport task its dispatch state
    /// and the receiving end of the send-handle to drain into the socket.
    pub fn connect(&self) -> (PeerConnection, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let conn = PeerConnection {
            connection_id: Uuid::new_v4(),
            peer_id: None,
            tx,
        };
        debug!(connection = %conn.connection_id, "connection attached");
        (conn, rx)
    }

    /// Decode and dispatch one inbound frame, pushing any direct responses to
    /// the originating connection. Responses and the notifications raised by
    /// the handlers all go out under the registry lock, which is what keeps
    /// per-target ordering aligned with dispatch order.
    pub fn handle_text(&self, conn: &mut PeerConnection, text: &str) {
        if text.len() > MAX_FRAME_BYTES {
            recorder::record_frame_error();
            self.reply(
                conn,
                DispatchError::FrameTooLarge {
                    actual: text.len(),
                    limit: MAX_FRAME_BYTES,
                }
                .into_frame(),
            );
            return;
        }

        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                recorder::record_frame_error();
                self.reply(conn, DispatchError::from_decode(err).into_frame());
                return;
            }
        };
        recorder::record_frame_received(frame.kind());

        let mut registries = self.registries.lock();
        match self.dispatch(&mut registries, conn, frame) {
            Ok(responses) => {
                for response in responses {
                    self.reply(conn, response);
                }
            }
            Err(err) => {
                recorder::record_frame_error();
                self.reply(conn, err.into_frame());
            }
        }
    }

    /// Tear down a connection: scrub the peer from every registry and drop
    /// the send-handle synchronously, before any other dispatch runs. If a
    /// newer connection has re-registered the same peer id, the stale socket
    /// closing must not scrub the fresh registration.
    pub fn disconnect(&self, conn: &PeerConnection) {
        let Some(peer_id) = &conn.peer_id else {
            return;
        };

        let mut registries = self.registries.lock();
        if !self.connections.owns(peer_id, conn.connection_id) {
            debug!(peer = %peer_id, "stale connection closed; binding already superseded");
            return;
        }

        registries.relays.unregister(peer_id);
        registries.rendezvous.unregister_peer(peer_id);
        if let Some(chunks) = registries.chunks.as_mut() {
            chunks.unregister_peer(peer_id);
        }
        self.connections.unbind(peer_id);
        info!(peer = %peer_id, "peer disconnected, registries scrubbed");
    }

    /// Periodic sweep of every registry plus a gauge refresh.
    pub fn run_maintenance(&self) {
        let mut registries = self.registries.lock();
        let relays = registries.relays.cleanup();
        let rendezvous = registries.rendezvous.cleanup();
        let chunks = registries
            .chunks
            .as_mut()
            .map(ChunkIndex::cleanup)
            .unwrap_or(0);

        let relay_stats = registries.relays.stats();
        let rendezvous_stats = registries.rendezvous.stats();
        let chunk_stats = registries
            .chunks
            .as_ref()
            .map(ChunkIndex::stats)
            .unwrap_or_default();
        recorder::record_registry_gauges(
            self.connections.len(),
            relay_stats.total,
            relay_stats.available,
            rendezvous_stats.daily_entries,
            rendezvous_stats.hourly_entries,
            chunk_stats.source_entries,
            chunk_stats.cached_chunks,
            chunk_stats.pending_requests,
        );

        if relays + rendezvous + chunks > 0 {
            debug!(relays, rendezvous, chunks, "maintenance sweep evicted entries");
        }
    }

    pub fn connected_peers(&self) -> usize {
        self.connections.len()
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.registries.lock().relays.stats()
    }

    pub fn rendezvous_stats(&self) -> RendezvousStats {
        self.registries.lock().rendezvous.stats()
    }

    pub fn chunk_stats(&self) -> Option<ChunkStats> {
        self.registries.lock().chunks.as_ref().map(ChunkIndex::stats)
    }

    fn dispatch(
        &self,
        registries: &mut Registries,
        conn: &mut PeerConnection,
        frame: ClientFrame,
    ) -> DispatchResult<Vec<ServerFrame>> {
        if conn.peer_id.is_none()
            && !matches!(frame, ClientFrame::Register { .. } | ClientFrame::Ping)
        {
            return Err(DispatchError::InvalidRequest("Not registered".to_string()));
        }

        match frame {
            ClientFrame::Register {
                peer_id,
                max_connections,
                public_key,
            } => {
                if !is_valid_peer_id(&peer_id) {
                    return Err(DispatchError::InvalidRequest("Invalid peerId".to_string()));
                }

                self.connections
                    .bind(&peer_id, conn.connection_id, conn.tx.clone());
                conn.peer_id = Some(peer_id.clone());

                registries
                    .relays
                    .register(&peer_id, max_connections, public_key);
                let relays = registries
                    .relays
                    .get_available_relays(&peer_id, DEFAULT_RELAY_COUNT);

                info!(peer = %peer_id, "peer registered");
                Ok(vec![ServerFrame::Registered { peer_id, relays }])
            }

            ClientFrame::UpdateLoad {
                peer_id,
                connected_count,
            } => {
                registries.relays.update_load(&peer_id, connected_count);
                Ok(vec![ServerFrame::LoadUpdated])
            }

            ClientFrame::RegisterRendezvous {
                peer_id,
                daily_points,
                hourly_tokens,
                dead_drop,
                relay_id,
            } => {
                let dead_drops = registries.rendezvous.register_daily_points(
                    &peer_id,
                    &daily_points,
                    dead_drop.as_deref(),
                    &relay_id,
                );
                let live_matches = registries.rendezvous.register_hourly_tokens(
                    &peer_id,
                    &hourly_tokens,
                    &relay_id,
                );
                Ok(vec![ServerFrame::RendezvousResult {
                    live_matches,
                    dead_drops,
                }])
            }

            ClientFrame::GetRelays { peer_id, count } => {
                let relays = registries
                    .relays
                    .get_available_relays(&peer_id, count.unwrap_or(DEFAULT_RELAY_COUNT));
                Ok(vec![ServerFrame::Relays { relays }])
            }

            ClientFrame::Heartbeat { peer_id } => {
                registries.relays.touch(&peer_id);
                Ok(vec![ServerFrame::HeartbeatAck {
                    timestamp: self.clock.now_ms(),
                }])
            }

            ClientFrame::Ping => Ok(vec![ServerFrame::Pong]),

            ClientFrame::ChunkAnnounce { peer_id, chunks } => {
                let index = Self::chunk_index(registries)?;
                if chunks
                    .iter()
                    .any(|c| !is_valid_resource_id(&c.chunk_id))
                {
                    return Err(DispatchError::InvalidRequest("Invalid chunkId".to_string()));
                }
                let registered = index.announce(&peer_id, &chunks);
                Ok(vec![ServerFrame::ChunkAnnounceAck { registered }])
            }

            ClientFrame::ChunkRequest { peer_id, chunk_id } => {
                let index = Self::chunk_index(registries)?;
                if !is_valid_resource_id(&chunk_id) {
                    return Err(DispatchError::InvalidRequest("Invalid chunkId".to_string()));
                }
                match index.request(&peer_id, &chunk_id) {
                    RequestOutcome::Data { payload, source } => {
                        Ok(vec![ServerFrame::ChunkData {
                            chunk_id,
                            payload,
                            source,
                        }])
                    }
                    RequestOutcome::NotFound => Ok(vec![ServerFrame::ChunkNotFound { chunk_id }]),
                    // A pull is in flight; the push will fan the data out.
                    RequestOutcome::Pending => Ok(vec![]),
                }
            }

            ClientFrame::ChunkPush {
                peer_id,
                chunk_id,
                data,
            } => {
                let index = Self::chunk_index(registries)?;
                if !is_valid_resource_id(&chunk_id) {
                    return Err(DispatchError::InvalidRequest("Invalid chunkId".to_string()));
                }
                index.push(&peer_id, &chunk_id, &data)?;
                Ok(vec![ServerFrame::ChunkPushAck { chunk_id }])
            }
        }
    }

    fn chunk_index(registries: &mut Registries) -> DispatchResult<&mut ChunkIndex> {
        registries
            .chunks
            .as_mut()
            .ok_or(DispatchError::ChunksUnavailable)
    }

    /// Push a direct response to the originating connection. Send failures
    /// are logged and swallowed; the dispatch loop never aborts for one
    /// peer's dead socket.
    fn reply(&self, conn: &PeerConnection, frame: ServerFrame) {
        let kind = frame.kind();
        match conn.tx.try_send(frame) {
            Ok(()) => recorder::record_frame_sent(kind),
            Err(err) => {
                recorder::record_send_failure();
                warn!(
                    connection = %conn.connection_id,
                    kind,
                    error = %err,
                    "dropping response frame"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let clock = Arc::new(ManualClock::new(0));
        Dispatcher::new(&Config::default(), clock)
    }

    fn attach(d: &Dispatcher) -> (PeerConnection, mpsc::Receiver<ServerFrame>) {
        d.connect()
    }

    fn send(d: &Dispatcher, conn: &mut PeerConnection, value: serde_json::Value) {
        d.handle_text(conn, &value.to_string());
    }

    fn register(d: &Dispatcher, conn: &mut PeerConnection, peer: &str) {
        send(d, conn, json!({"type": "register", "peerId": peer}));
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_register_binds_and_answers() {
        let d = dispatcher();
        let (mut conn, mut rx) = attach(&d);

        register(&d, &mut conn, "alice");

        assert_eq!(conn.peer_id.as_deref(), Some("alice"));
        assert_eq!(d.connected_peers(), 1);
        match drain(&mut rx).as_slice() {
            [ServerFrame::Registered { peer_id, relays }] => {
                assert_eq!(peer_id, "alice");
                assert!(relays.is_empty()); // requester excluded
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_peer_id_rejected() {
        let d = dispatcher();
        let (mut conn, mut rx) = attach(&d);

        send(&d, &mut conn, json!({"type": "register", "peerId": "bad id!"}));

        assert!(conn.peer_id.is_none());
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerFrame::Error { .. }]
        ));
    }

    #[test]
    fn test_unregistered_connection_gets_error_except_ping() {
        let d = dispatcher();
        let (mut conn, mut rx) = attach(&d);

        send(&d, &mut conn, json!({"type": "ping"}));
        assert!(matches!(drain(&mut rx).as_slice(), [ServerFrame::Pong]));

        send(&d, &mut conn, json!({"type": "heartbeat", "peerId": "alice"}));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerFrame::Error { .. }]
        ));
    }

    #[test]
    fn test_malformed_and_unknown_frames_keep_connection_open() {
        let d = dispatcher();
        let (mut conn, mut rx) = attach(&d);

        d.handle_text(&mut conn, "{{{");
        send(&d, &mut conn, json!({"type": "warp_drive"}));
        send(&d, &mut conn, json!({"type": "ping"}));

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], ServerFrame::Error { .. }));
        assert!(matches!(frames[1], ServerFrame::Error { .. }));
        assert_eq!(frames[2], ServerFrame::Pong);
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let d = dispatcher();
        let (mut conn, mut rx) = attach(&d);

        let huge = "x".repeat(MAX_FRAME_BYTES + 1);
        d.handle_text(&mut conn, &huge);

        match drain(&mut rx).as_slice() {
            [ServerFrame::Error { message }] => assert!(message.contains("Frame too large")),
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_scrubs_all_registries() {
        let d = dispatcher();
        let (mut conn, _rx) = attach(&d);

        register(&d, &mut conn, "alice");
        send(
            &d,
            &mut conn,
            json!({
                "type": "register_rendezvous",
                "peerId": "alice",
                "dailyPoints": ["day_X"],
                "hourlyTokens": ["hr_Y"],
                "relayId": "R1"
            }),
        );
        send(
            &d,
            &mut conn,
            json!({
                "type": "chunk_announce",
                "peerId": "alice",
                "chunks": [{"chunkId": "ch_1", "routingHash": "h"}]
            }),
        );

        d.disconnect(&conn);

        assert_eq!(d.connected_peers(), 0);
        assert_eq!(d.relay_stats().total, 0);
        let rdv = d.rendezvous_stats();
        assert_eq!(rdv.daily_entries + rdv.hourly_entries, 0);
        assert_eq!(d.chunk_stats().unwrap().source_entries, 0);
    }

    #[test]
    fn test_stale_disconnect_keeps_new_binding() {
        let d = dispatcher();
        let (mut old_conn, _old_rx) = attach(&d);
        register(&d, &mut old_conn, "alice");

        // Same peer reconnects before the old socket is reaped.
        let (mut new_conn, _new_rx) = attach(&d);
        register(&d, &mut new_conn, "alice");

        d.disconnect(&old_conn);

        assert_eq!(d.connected_peers(), 1);
        assert_eq!(d.relay_stats().total, 1);
    }

    #[test]
    fn test_chunk_ops_without_chunk_support() {
        let clock = Arc::new(ManualClock::new(0));
        let config = Config {
            chunk_support: false,
            ..Config::default()
        };
        let d = Dispatcher::new(&config, clock);
        let (mut conn, mut rx) = attach(&d);

        register(&d, &mut conn, "alice");
        drain(&mut rx);

        send(&d, &mut conn, json!({"type": "chunk_request", "peerId": "alice", "chunkId": "ch_1"}));
        match drain(&mut rx).as_slice() {
            [ServerFrame::Error { message }] => {
                assert!(message.contains("not available"), "{message}");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_ack_carries_clock_timestamp() {
        let clock = Arc::new(ManualClock::new(42_000));
        let d = Dispatcher::new(&Config::default(), clock);
        let (mut conn, mut rx) = attach(&d);

        register(&d, &mut conn, "alice");
        drain(&mut rx);
        send(&d, &mut conn, json!({"type": "heartbeat", "peerId": "alice"}));

        match drain(&mut rx).as_slice() {
            [ServerFrame::HeartbeatAck { timestamp }] => assert_eq!(*timestamp, 42_000),
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_update_load_then_get_relays() {
        let d = dispatcher();
        let (mut provider, _prx) = attach(&d);
        register(&d, &mut provider, "relay-1");

        let (mut client, mut crx) = attach(&d);
        register(&d, &mut client, "client");
        drain(&mut crx);

        send(&d, &mut client, json!({"type": "get_relays", "peerId": "client"}));
        match drain(&mut crx).as_slice() {
            [ServerFrame::Relays { relays }] => {
                assert_eq!(relays.len(), 1);
                assert_eq!(relays[0].peer_id, "relay-1");
            }
            other => panic!("unexpected frames: {other:?}"),
        }

        // Saturate relay-1; it drops out of the selectable set.
        send(
            &d,
            &mut provider,
            json!({"type": "update_load", "peerId": "relay-1", "connectedCount": 10}),
        );
        send(&d, &mut client, json!({"type": "get_relays", "peerId": "client"}));
        match drain(&mut crx).as_slice() {
            [ServerFrame::Relays { relays }] => assert!(relays.is_empty()),
            other => panic!("unexpected frames: {other:?}"),
        }
    }
}
