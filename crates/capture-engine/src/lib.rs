//! Session-scoped capture engine: wires the event bus, session registry,
//! correlator, protocol bridge and capture store into one facade.
//!
//! One engine per capture session. `start` brings up the supervised bridge
//! and maintenance loops; `shutdown` tears them down with a bounded grace
//! period and performs the single durable flush.

pub mod config;
mod engine;
mod handlers;
mod sink;

pub use config::CaptureConfig;
pub use engine::CaptureEngine;
pub use handlers::StoreHandler;
pub use sink::EngineSink;

/// Registers every component's metrics on one Prometheus registry.
pub fn register_metrics(registry: &prometheus::Registry) {
    cdp_bridge::metrics::register_metrics(registry);
    webtap_session_registry::metrics::register_metrics(registry);
    webtap_correlator::metrics::register_metrics(registry);
}
