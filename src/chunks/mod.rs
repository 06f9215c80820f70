//! Chunk index
//!
//! Availability map plus bounded store-and-forward cache for small encrypted
//! content chunks. The multicast-pull optimization makes N waiters cost one
//! upload: the first request with no cached copy dispatches a single
//! `chunk_pull` to a source, and the resulting push is fanned out to every
//! pending waiter.

mod error;
mod index;
mod types;

pub use error::{ChunkError, ChunkResult};
pub use index::{ChunkIndex, ChunkIndexConfig};
pub use types::{
    ChunkAnnouncement, ChunkEvents, ChunkStats, DataSource, RequestOutcome,
    MAX_CHUNK_PAYLOAD_BYTES, SERVER_CACHE_ID,
};
