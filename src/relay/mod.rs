//! Relay registry
//!
//! Tracks peers that advertise spare capacity to relay traffic for others and
//! answers load-balanced selection queries.

mod registry;
mod types;

pub use registry::RelayRegistry;
pub use types::{RelayInfo, RelayOffer, RelayStats, DEFAULT_MAX_CONNECTIONS};
