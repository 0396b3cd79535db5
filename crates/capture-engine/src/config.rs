use std::time::Duration;

use capture_store::StoreConfig;
use cdp_bridge::BridgeConfig;
use tap_policy::FilterPolicy;
use webtap_correlator::CorrelatorConfig;

/// Read-only configuration for one capture session. Built once at engine
/// construction; nothing reloads it mid-session.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Master switch: a disabled engine starts nothing and captures nothing.
    pub enabled: bool,
    pub policy: FilterPolicy,
    pub correlator: CorrelatorConfig,
    pub store: StoreConfig,
    pub bridge: BridgeConfig,
    /// Broadcast buffer for bus subscribers.
    pub event_capacity: usize,
    /// Per-handler budget on the event bus.
    pub handler_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: FilterPolicy::default(),
            correlator: CorrelatorConfig::default(),
            store: StoreConfig::default(),
            bridge: BridgeConfig::default(),
            event_capacity: 256,
            handler_timeout_ms: 2_000,
        }
    }
}

impl CaptureConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}
