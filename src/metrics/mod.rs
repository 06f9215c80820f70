//! Metrics and observability module
//!
//! Prometheus-compatible metrics for the coordinator core and directory:
//! frame traffic, registry sizes, cache behavior, pull/push activity, and
//! rendezvous matching.

pub mod exporter;
pub mod recorder;

pub use exporter::start_metrics_exporter;
pub use recorder::init_metrics;
