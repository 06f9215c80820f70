//! meshpoint: coordination core for a privacy-preserving P2P messaging overlay.
//!
//! A coordinator node owns an exclusive slice of the peer population and serves
//! it from four in-memory registries behind a single-writer dispatch core:
//! relay selection, rendezvous matching, chunk availability with an
//! opportunistic store-and-forward cache, and the connection table of
//! send-handles. A separate directory service keeps the federated list of
//! coordinator endpoints.

pub mod api;
pub mod chunks;
pub mod clock;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod metrics;
pub mod relay;
pub mod rendezvous;
