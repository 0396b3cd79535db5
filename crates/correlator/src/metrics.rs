use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref CORRELATOR_INFLIGHT: IntGauge = IntGauge::new(
        "webtap_correlator_inflight",
        "Requests currently awaiting completion",
    )
    .unwrap();
    static ref CORRELATOR_ADMITTED_TOTAL: IntCounter = IntCounter::new(
        "webtap_correlator_admitted_total",
        "Requests admitted into the in-flight table",
    )
    .unwrap();
    static ref CORRELATOR_REJECTED_TOTAL: IntCounter = IntCounter::new(
        "webtap_correlator_rejected_total",
        "Requests rejected by the admission policy",
    )
    .unwrap();
    static ref CORRELATOR_FINALIZED_TOTAL: IntCounter = IntCounter::new(
        "webtap_correlator_finalized_total",
        "Records finalized (completed or failed)",
    )
    .unwrap();
    static ref CORRELATOR_CORRELATION_MISSES: IntCounter = IntCounter::new(
        "webtap_correlator_misses_total",
        "Lifecycle notifications with no matching in-flight entry",
    )
    .unwrap();
    static ref CORRELATOR_BODY_FETCH_FAILURES: IntCounter = IntCounter::new(
        "webtap_correlator_body_fetch_failures_total",
        "Response body fetches that failed and degraded the record",
    )
    .unwrap();
    static ref CORRELATOR_EVICTED_TOTAL: IntCounter = IntCounter::new(
        "webtap_correlator_evicted_total",
        "In-flight entries evicted as idle or purged on release",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register correlator metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CORRELATOR_INFLIGHT.clone());
    register(registry, CORRELATOR_ADMITTED_TOTAL.clone());
    register(registry, CORRELATOR_REJECTED_TOTAL.clone());
    register(registry, CORRELATOR_FINALIZED_TOTAL.clone());
    register(registry, CORRELATOR_CORRELATION_MISSES.clone());
    register(registry, CORRELATOR_BODY_FETCH_FAILURES.clone());
    register(registry, CORRELATOR_EVICTED_TOTAL.clone());
}

pub fn set_inflight(count: usize) {
    CORRELATOR_INFLIGHT.set(count as i64);
}

pub fn record_admitted() {
    CORRELATOR_ADMITTED_TOTAL.inc();
}

pub fn record_rejected() {
    CORRELATOR_REJECTED_TOTAL.inc();
}

pub fn record_finalized() {
    CORRELATOR_FINALIZED_TOTAL.inc();
}

pub fn record_miss() {
    CORRELATOR_CORRELATION_MISSES.inc();
}

pub fn record_body_fetch_failure() {
    CORRELATOR_BODY_FETCH_FAILURES.inc();
}

pub fn record_evicted(count: usize) {
    CORRELATOR_EVICTED_TOTAL.inc_by(count as u64);
}
