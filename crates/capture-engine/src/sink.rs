use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use cdp_bridge::params::{
    LoadingFailedParams, LoadingFinishedParams, RequestWillBeSentParams, ResponseReceivedParams,
    TargetInfo,
};
use cdp_bridge::NotificationSink;
use webtap_core_types::TargetId;
use webtap_correlator::Correlator;
use webtap_event_bus::{BusEvent, CaptureBus};
use webtap_session_registry::SessionRegistry;

/// Routes bridge notifications into the registry and the correlator. This
/// is the only place lifecycle wiring lives; the bridge itself stays dumb.
pub struct EngineSink {
    registry: Arc<SessionRegistry>,
    correlator: Arc<Correlator>,
    bus: Arc<CaptureBus>,
}

impl EngineSink {
    pub fn new(
        registry: Arc<SessionRegistry>,
        correlator: Arc<Correlator>,
        bus: Arc<CaptureBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            correlator,
            bus,
        })
    }
}

#[async_trait]
impl NotificationSink for EngineSink {
    async fn on_attached(&self, target: TargetId, cdp_session: String, info: TargetInfo) {
        self.registry
            .ensure_registered(target.clone(), &cdp_session);
        self.registry.update_page(&target, info.url, info.title);

        for domain in ["Network", "Page"] {
            if let Err(err) = self.registry.enable_capability(&target, domain).await {
                // Capture stays best-effort: a failed enable degrades this
                // connection but never takes the engine down.
                warn!(target: "capture-engine", connection = %target, %err, "capability enable failed");
                let _ = self.bus.dispatch(BusEvent::CaptureError {
                    session: None,
                    request: None,
                    message: err.to_string(),
                });
            }
        }

        let _ = self.bus.dispatch(BusEvent::ConnectionAttached { target });
    }

    async fn on_detached(&self, cdp_session: String) {
        if let Some(target) = self.registry.release_by_session(&cdp_session) {
            let _ = self.bus.dispatch(BusEvent::ConnectionDetached { target });
        }
    }

    async fn on_navigated(&self, target: TargetId, url: String) {
        // frameNavigated carries no title; keep the last known one.
        self.registry.update_page(&target, Some(url), None);
    }

    async fn on_request_started(
        &self,
        target: TargetId,
        cdp_session: String,
        params: RequestWillBeSentParams,
    ) {
        let (page_url, page_title) = self
            .registry
            .snapshot(&target)
            .map(|ctx| (ctx.page_url, ctx.page_title))
            .unwrap_or((None, None));
        self.correlator
            .on_request_started(target, cdp_session, params, page_url, page_title);
    }

    async fn on_response_received(&self, target: TargetId, params: ResponseReceivedParams) {
        self.correlator.on_response_received(target, params);
    }

    async fn on_loading_finished(&self, target: TargetId, params: LoadingFinishedParams) {
        self.correlator.on_loading_finished(target, params).await;
    }

    async fn on_loading_failed(&self, target: TargetId, params: LoadingFailedParams) {
        self.correlator.on_loading_failed(target, params).await;
    }
}
