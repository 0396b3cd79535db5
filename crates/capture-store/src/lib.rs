//! Dedup, staging and durable flush for finalized traffic records.
//!
//! Records staged during a capture session are written to the backend as a
//! single batch at session end. Exact content-hash dedup runs at staging
//! time; a TTL bounds how long an unflushed record may linger.

pub mod dedup;
pub mod errors;
mod store;

pub use dedup::DedupIndex;
pub use errors::StoreError;
pub use store::{CaptureStore, MemoryTrafficStore, StageOutcome, StoreConfig, TrafficStore};
