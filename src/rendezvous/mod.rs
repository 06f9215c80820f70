//! Rendezvous registry
//!
//! Lets two peers who share a secret find each other through opaque,
//! time-bucketed hashes without revealing the secret to the coordinator.
//! Daily points may carry an encrypted dead drop; hourly tokens produce live
//! match notifications in both directions.

mod registry;
mod types;

pub use registry::RendezvousRegistry;
pub use types::{DeadDrop, LiveMatch, MatchNotifier, RendezvousStats};
