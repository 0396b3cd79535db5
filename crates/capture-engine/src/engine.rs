use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::{info, warn};

use capture_store::{CaptureStore, TrafficStore};
use cdp_bridge::{CdpBridge, CdpTransport, NotificationSink, SessionResolver};
use webtap_core_types::{SessionId, TapError};
use webtap_correlator::{Correlator, MaintenanceHandle};
use webtap_event_bus::{BusEvent, CaptureBus, EventEnvelope, EventKind};
use webtap_session_registry::{InflightPurge, SessionRegistry};

use crate::config::CaptureConfig;
use crate::handlers::StoreHandler;
use crate::sink::EngineSink;

/// Facade over the capture pipeline: bus, registry, correlator, bridge and
/// store, assembled for one capture session.
pub struct CaptureEngine {
    session: SessionId,
    cfg: CaptureConfig,
    bus: Arc<CaptureBus>,
    registry: Arc<SessionRegistry>,
    correlator: Arc<Correlator>,
    store: Arc<CaptureStore>,
    bridge: Arc<CdpBridge>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl CaptureEngine {
    pub fn new(
        session: SessionId,
        cfg: CaptureConfig,
        transport: Arc<dyn CdpTransport>,
        backend: Arc<dyn TrafficStore>,
    ) -> Arc<Self> {
        let bus = CaptureBus::new(cfg.event_capacity, cfg.handler_timeout());
        let registry = SessionRegistry::new(Arc::clone(&transport));
        let correlator = Correlator::new(
            session.clone(),
            cfg.correlator.clone(),
            cfg.policy.clone(),
            Arc::clone(&transport),
            Arc::clone(&bus),
        );
        registry.set_purge(Arc::clone(&correlator) as Arc<dyn InflightPurge>);

        let store = CaptureStore::new(cfg.store.clone(), backend);
        bus.register(
            EventKind::TrafficCaptured,
            StoreHandler::new(Arc::clone(&store)),
        );

        let sink = EngineSink::new(
            Arc::clone(&registry),
            Arc::clone(&correlator),
            Arc::clone(&bus),
        );
        let bridge = CdpBridge::new(
            transport,
            Arc::clone(&registry) as Arc<dyn SessionResolver>,
            sink as Arc<dyn NotificationSink>,
            cfg.bridge.clone(),
        );

        Arc::new(Self {
            session,
            cfg,
            bus,
            registry,
            correlator,
            store,
            bridge,
            maintenance: Mutex::new(None),
        })
    }

    /// Starts the bridge loops and the correlator maintenance. A disabled
    /// engine starts nothing and succeeds.
    pub async fn start(&self) -> Result<(), TapError> {
        if !self.cfg.enabled {
            info!(target: "capture-engine", session = %self.session, "capture disabled");
            return Ok(());
        }
        self.bridge
            .start()
            .await
            .map_err(|err| err.into_tap_error())?;
        let mut guard = self.maintenance.lock().await;
        if guard.is_none() {
            *guard = Some(self.correlator.spawn_maintenance());
        }
        info!(target: "capture-engine", session = %self.session, "capture started");
        Ok(())
    }

    /// Stops supervised work and performs the final flush. Capture is
    /// best-effort: a storage fault is surfaced as a `CaptureError` event,
    /// never returned as a failure.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
        if let Some(handle) = self.maintenance.lock().await.take() {
            if let Err(err) = handle.shutdown().await {
                warn!(target: "capture-engine", %err, "maintenance task failed on shutdown");
            }
        }
        match self.store.flush().await {
            Ok(count) => {
                info!(target: "capture-engine", session = %self.session, count, "final flush complete");
            }
            Err(err) => {
                warn!(target: "capture-engine", session = %self.session, %err, "final flush failed");
                let _ = self
                    .bus
                    .dispatch(BusEvent::CaptureError {
                        session: Some(self.session.clone()),
                        request: None,
                        message: format!("final flush failed: {err}"),
                    })
                    .wait()
                    .await;
            }
        }
    }

    /// Broadcast view of every bus event, for the agent or a dashboard.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }
}
