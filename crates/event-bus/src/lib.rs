//! Typed dispatch core for the webtap capture engine.
//!
//! Handlers are registered explicitly per [`EventKind`] at construction time.
//! [`CaptureBus::dispatch`] fans an event out to every handler registered for
//! its kind, runs them concurrently with a per-handler timeout, and returns a
//! [`DispatchHandle`] that resolves once all of them have finished (or timed
//! out). A failing or timed-out handler never cancels its siblings; the
//! failure is captured in the [`DispatchOutcome`] and surfaced as a
//! best-effort `CaptureError` event.
//!
//! Every dispatched event is also forwarded to broadcast subscribers so
//! passive observers (the agent, a dashboard) can watch without registering
//! handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use webtap_core_types::{EventId, RequestId, SessionId, TapError, TargetId, TrafficRecord};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("dispatch abandoned")]
    Abandoned,
}

impl BusError {
    pub fn into_tap_error(self) -> TapError {
        TapError::new(self.to_string())
    }
}

/// Events carried on the bus.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// A finalized traffic record, with the policy's store decision attached.
    TrafficCaptured {
        record: TrafficRecord,
        should_store: bool,
    },
    /// An operational fault that is not a per-request failure.
    CaptureError {
        session: Option<SessionId>,
        request: Option<RequestId>,
        message: String,
    },
    ConnectionAttached {
        target: TargetId,
    },
    ConnectionDetached {
        target: TargetId,
    },
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::TrafficCaptured { .. } => EventKind::TrafficCaptured,
            BusEvent::CaptureError { .. } => EventKind::CaptureError,
            BusEvent::ConnectionAttached { .. } => EventKind::ConnectionAttached,
            BusEvent::ConnectionDetached { .. } => EventKind::ConnectionDetached,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    TrafficCaptured,
    CaptureError,
    ConnectionAttached,
    ConnectionDetached,
}

/// Envelope delivered to broadcast subscribers. The parent link is for
/// traceability only; it never creates a blocking dependency.
#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: EventId,
    pub parent: Option<EventId>,
    pub event: BusEvent,
}

/// A unit of reaction registered against one event kind.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, event: &BusEvent) -> Result<(), BusError>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandlerOutcome {
    Ok,
    Failed(String),
    TimedOut,
}

#[derive(Clone, Debug)]
pub struct HandlerResult {
    pub handler: &'static str,
    pub outcome: HandlerOutcome,
}

/// Collected results for one dispatched event. Result order is unspecified.
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub event_id: EventId,
    pub results: Vec<HandlerResult>,
}

impl DispatchOutcome {
    pub fn all_ok(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.outcome, HandlerOutcome::Ok))
    }
}

/// Resolves once every handler for the dispatched event has run or timed
/// out. Dropping the handle abandons the wait, not the handlers.
pub struct DispatchHandle {
    rx: oneshot::Receiver<DispatchOutcome>,
}

impl DispatchHandle {
    pub async fn wait(self) -> Result<DispatchOutcome, BusError> {
        self.rx.await.map_err(|_| BusError::Abandoned)
    }
}

pub struct CaptureBus {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
    broadcast: broadcast::Sender<EventEnvelope>,
    handler_timeout: Duration,
}

impl CaptureBus {
    pub fn new(capacity: usize, handler_timeout: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            broadcast: tx,
            handler_timeout,
        })
    }

    /// Explicit registration: the component declares which kind it handles.
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.broadcast.subscribe()
    }

    pub fn dispatch(self: &Arc<Self>, event: BusEvent) -> DispatchHandle {
        self.dispatch_linked(event, None)
    }

    /// Dispatch with a parent event link for traceability.
    pub fn dispatch_linked(
        self: &Arc<Self>,
        event: BusEvent,
        parent: Option<EventId>,
    ) -> DispatchHandle {
        let event_id = EventId::new();
        let kind = event.kind();
        let envelope = EventEnvelope {
            id: event_id,
            parent,
            event,
        };

        // Broadcast first: passive observers see every event whether or not
        // any handler is registered.
        let _ = self.broadcast.send(envelope.clone());

        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let (tx, rx) = oneshot::channel();
        let bus = Arc::clone(self);
        let timeout = self.handler_timeout;
        tokio::spawn(async move {
            let event = Arc::new(envelope.event);
            let mut joins = Vec::with_capacity(handlers.len());
            for handler in handlers {
                let event = Arc::clone(&event);
                let name = handler.name();
                joins.push((
                    name,
                    tokio::spawn(async move {
                        tokio::time::timeout(timeout, handler.handle(&event)).await
                    }),
                ));
            }

            let mut results = Vec::with_capacity(joins.len());
            for (name, join) in joins {
                let outcome = match join.await {
                    Ok(Ok(Ok(()))) => HandlerOutcome::Ok,
                    Ok(Ok(Err(err))) => HandlerOutcome::Failed(err.to_string()),
                    Ok(Err(_)) => HandlerOutcome::TimedOut,
                    Err(err) => HandlerOutcome::Failed(format!("handler panicked: {err}")),
                };
                results.push(HandlerResult {
                    handler: name,
                    outcome,
                });
            }

            for result in &results {
                match &result.outcome {
                    HandlerOutcome::Ok => {}
                    HandlerOutcome::Failed(message) => {
                        warn!(target: "event-bus", handler = result.handler, %message, "handler failed");
                        // Suppressed for CaptureError events to avoid recursion.
                        if kind != EventKind::CaptureError {
                            let _ = bus.dispatch_linked(
                                BusEvent::CaptureError {
                                    session: None,
                                    request: None,
                                    message: format!("handler {}: {}", result.handler, message),
                                },
                                Some(event_id),
                            );
                        }
                    }
                    HandlerOutcome::TimedOut => {
                        warn!(target: "event-bus", handler = result.handler, "handler timed out");
                        if kind != EventKind::CaptureError {
                            let _ = bus.dispatch_linked(
                                BusEvent::CaptureError {
                                    session: None,
                                    request: None,
                                    message: format!("handler {} timed out", result.handler),
                                },
                                Some(event_id),
                            );
                        }
                    }
                }
            }

            debug!(target: "event-bus", ?kind, handlers = results.len(), "dispatch complete");
            let _ = tx.send(DispatchOutcome { event_id, results });
        });

        DispatchHandle { rx }
    }
}
