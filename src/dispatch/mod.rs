//! Dispatch core
//!
//! Demultiplexes typed frames from peer connections into registry operations
//! and marshals outbound frames through the connection table. All registry
//! mutation is serialized behind one lock (single-writer discipline); the
//! only suspension points live in the transport layer above.

mod connections;
mod dispatcher;
mod error;
mod types;

pub use connections::{ConnectionTable, SEND_QUEUE_DEPTH};
pub use dispatcher::{Dispatcher, PeerConnection};
pub use error::{DispatchError, DispatchResult};
pub use types::{
    is_valid_peer_id, is_valid_resource_id, ClientFrame, ServerFrame, MAX_FRAME_BYTES,
};
