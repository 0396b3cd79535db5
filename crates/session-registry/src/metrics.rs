use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref REGISTRY_CONNECTIONS: IntGauge = IntGauge::new(
        "webtap_registry_connections",
        "Live logical connections tracked by the registry",
    )
    .unwrap();
    static ref REGISTRY_CAPABILITY_ENABLES: IntCounter = IntCounter::new(
        "webtap_registry_capability_enables_total",
        "Capability enable commands issued to the transport",
    )
    .unwrap();
    static ref REGISTRY_RELEASES: IntCounter = IntCounter::new(
        "webtap_registry_releases_total",
        "Connections released and purged",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, REGISTRY_CONNECTIONS.clone());
    register(registry, REGISTRY_CAPABILITY_ENABLES.clone());
    register(registry, REGISTRY_RELEASES.clone());
}

pub fn set_connection_count(count: usize) {
    REGISTRY_CONNECTIONS.set(count as i64);
}

pub fn record_capability_enabled() {
    REGISTRY_CAPABILITY_ENABLES.inc();
}

pub fn record_release() {
    REGISTRY_RELEASES.inc();
}
