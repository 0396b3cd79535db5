//! Request correlation for the webtap capture engine.
//!
//! Keeps an in-flight table keyed by (connection, request id), merges the
//! protocol's request/response/finish/fail notifications into a single
//! [`TrafficRecord`], and emits it on the event bus exactly once per request.
//! Admission filtering happens at request start; idle entries are evicted by
//! a maintenance loop so lost terminal events cannot leak table space.
//!
//! [`TrafficRecord`]: webtap_core_types::TrafficRecord

mod correlator;
pub mod errors;
mod inflight;
pub mod metrics;

pub use correlator::{Correlator, CorrelatorConfig, MaintenanceHandle};
pub use errors::CorrelatorError;
pub use inflight::{InflightEntry, Phase, ResponseMeta};
