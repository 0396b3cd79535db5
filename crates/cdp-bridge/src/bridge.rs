//! Notification bridge: pumps raw transport events onto a bounded queue and
//! drains them through a typed demux.
//!
//! The pump does no business logic, so the transport stream is never blocked
//! by correlation work; the bounded queue gives backpressure when the drain
//! falls behind. Both loops are supervised and torn down together at
//! shutdown with a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use webtap_core_types::TargetId;

use crate::error::BridgeError;
use crate::metrics;
use crate::params::{
    AttachedToTargetParams, DetachedFromTargetParams, FrameNavigatedParams, LoadingFailedParams,
    LoadingFinishedParams, RequestWillBeSentParams, ResponseReceivedParams, TargetInfo,
};
use crate::transport::{CdpTransport, TransportEvent};

/// Maps the transport's per-target session string to the logical connection.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, cdp_session: &str) -> Option<TargetId>;
}

/// Receives demultiplexed notifications. The bridge attaches the owning
/// connection identifier; it performs no business logic itself.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_attached(&self, target: TargetId, cdp_session: String, info: TargetInfo);
    async fn on_detached(&self, cdp_session: String);
    /// Main-frame navigation of an attached page.
    async fn on_navigated(&self, target: TargetId, url: String);
    async fn on_request_started(
        &self,
        target: TargetId,
        cdp_session: String,
        params: RequestWillBeSentParams,
    );
    async fn on_response_received(&self, target: TargetId, params: ResponseReceivedParams);
    async fn on_loading_finished(&self, target: TargetId, params: LoadingFinishedParams);
    async fn on_loading_failed(&self, target: TargetId, params: LoadingFailedParams);
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub queue_capacity: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            shutdown_grace_ms: 2_000,
        }
    }
}

pub struct CdpBridge {
    transport: Arc<dyn CdpTransport>,
    resolver: Arc<dyn SessionResolver>,
    sink: Arc<dyn NotificationSink>,
    cfg: BridgeConfig,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpBridge {
    pub fn new(
        transport: Arc<dyn CdpTransport>,
        resolver: Arc<dyn SessionResolver>,
        sink: Arc<dyn NotificationSink>,
        cfg: BridgeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            resolver,
            sink,
            cfg,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Err(BridgeError::AlreadyStarted);
            }
        }

        self.transport.start().await?;

        let (tx, mut rx) = mpsc::channel::<TransportEvent>(self.cfg.queue_capacity.max(1));

        let pump = {
            let bridge = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = bridge.shutdown.cancelled() => break,
                        event = bridge.transport.next_event() => {
                            match event {
                                Some(event) => {
                                    if tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    warn!(target: "cdp-bridge", "transport stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                debug!(target: "cdp-bridge", "pump loop exiting");
            })
        };

        let drain = {
            let bridge = Arc::clone(self);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = bridge.shutdown.cancelled() => break,
                        event = rx.recv() => {
                            match event {
                                Some(event) => bridge.process(event).await,
                                None => break,
                            }
                        }
                    }
                }
                debug!(target: "cdp-bridge", "drain loop exiting");
            })
        };

        let mut guard = self.tasks.lock().await;
        guard.push(pump);
        guard.push(drain);
        Ok(())
    }

    /// Cancels both loops, awaits them within the grace period, then aborts
    /// whatever is left.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let grace = Duration::from_millis(self.cfg.shutdown_grace_ms);
        let mut guard = self.tasks.lock().await;
        for mut handle in guard.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    async fn process(&self, event: TransportEvent) {
        metrics::record_event();
        match event.method.as_str() {
            "Target.attachedToTarget" => {
                let Some(params) = decode::<AttachedToTargetParams>(&event.method, event.params)
                else {
                    return;
                };
                if params.target_info.target_type != "page" {
                    return;
                }
                let target = TargetId(params.target_info.target_id.clone());
                self.sink
                    .on_attached(target, params.session_id, params.target_info)
                    .await;
            }
            "Target.detachedFromTarget" => {
                let Some(params) = decode::<DetachedFromTargetParams>(&event.method, event.params)
                else {
                    return;
                };
                self.sink.on_detached(params.session_id).await;
            }
            "Page.frameNavigated" => {
                let Some((target, _)) = self.owning_target(&event) else {
                    return;
                };
                let Some(params) = decode::<FrameNavigatedParams>(&event.method, event.params)
                else {
                    return;
                };
                // Subframe navigations do not move the page.
                if params.frame.parent_id.is_some() {
                    return;
                }
                self.sink.on_navigated(target, params.frame.url).await;
            }
            "Network.requestWillBeSent" => {
                let Some((target, session)) = self.owning_target(&event) else {
                    return;
                };
                let Some(params) = decode::<RequestWillBeSentParams>(&event.method, event.params)
                else {
                    return;
                };
                self.sink.on_request_started(target, session, params).await;
            }
            "Network.responseReceived" => {
                let Some((target, _)) = self.owning_target(&event) else {
                    return;
                };
                let Some(params) = decode::<ResponseReceivedParams>(&event.method, event.params)
                else {
                    return;
                };
                self.sink.on_response_received(target, params).await;
            }
            "Network.loadingFinished" => {
                let Some((target, _)) = self.owning_target(&event) else {
                    return;
                };
                let Some(params) = decode::<LoadingFinishedParams>(&event.method, event.params)
                else {
                    return;
                };
                self.sink.on_loading_finished(target, params).await;
            }
            "Network.loadingFailed" => {
                let Some((target, _)) = self.owning_target(&event) else {
                    return;
                };
                let Some(params) = decode::<LoadingFailedParams>(&event.method, event.params)
                else {
                    return;
                };
                self.sink.on_loading_failed(target, params).await;
            }
            other => {
                metrics::record_unhandled();
                debug!(target: "cdp-bridge", method = %other, "unhandled notification");
            }
        }
    }

    fn owning_target(&self, event: &TransportEvent) -> Option<(TargetId, String)> {
        let session = event.session_id.as_deref()?;
        match self.resolver.resolve(session) {
            Some(target) => Some((target, session.to_string())),
            None => {
                debug!(
                    target: "cdp-bridge",
                    session,
                    method = %event.method,
                    "notification for unknown session dropped"
                );
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
    match serde_json::from_value(params) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            metrics::record_decode_failure();
            warn!(target: "cdp-bridge", %method, %err, "failed to decode notification");
            None
        }
    }
}
