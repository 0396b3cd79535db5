//! Logical-connection lifecycle for the capture engine.
//!
//! One registry per capture session. Connections are keyed by [`TargetId`]
//! and mapped from the transport's session strings for demux; capability
//! enablement is idempotent per (connection, domain); releasing a connection
//! purges its in-flight correlation state through the [`InflightPurge`] seam.
//!
//! [`TargetId`]: webtap_core_types::TargetId

pub mod errors;
pub mod metrics;
pub mod model;
mod registry;

pub use errors::RegistryError;
pub use model::ConnectionCtx;
pub use registry::{InflightPurge, SessionRegistry};
