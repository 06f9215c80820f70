//! Server directory
//!
//! Federated coordinator endpoints discoverable by clients. Entries persist
//! in SQLite and expire five minutes after their last heartbeat; writes
//! require the shared bearer secret.

mod error;
mod http;
mod store;
mod types;

pub use error::{DirectoryError, DirectoryResult};
pub use http::{secrets_equal, DirectoryApi};
pub use store::DirectoryStore;
pub use types::{HeartbeatRequest, RegisterServerRequest, ServerEntry, ServerListResponse};
