use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, Registry};
use tracing::error;

lazy_static! {
    static ref BRIDGE_EVENTS_TOTAL: IntCounter = IntCounter::new(
        "webtap_bridge_events_total",
        "Transport notifications received by the bridge",
    )
    .unwrap();
    static ref BRIDGE_UNHANDLED_TOTAL: IntCounter = IntCounter::new(
        "webtap_bridge_unhandled_total",
        "Notifications dropped for unknown methods",
    )
    .unwrap();
    static ref BRIDGE_DECODE_FAILURES: IntCounter = IntCounter::new(
        "webtap_bridge_decode_failures_total",
        "Notifications dropped for undecodable payloads",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register bridge metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, BRIDGE_EVENTS_TOTAL.clone());
    register(registry, BRIDGE_UNHANDLED_TOTAL.clone());
    register(registry, BRIDGE_DECODE_FAILURES.clone());
}

pub fn record_event() {
    BRIDGE_EVENTS_TOTAL.inc();
}

pub fn record_unhandled() {
    BRIDGE_UNHANDLED_TOTAL.inc();
}

pub fn record_decode_failure() {
    BRIDGE_DECODE_FAILURES.inc();
}
