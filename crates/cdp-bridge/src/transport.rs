//! Transport seam to the remote-debugging endpoint.
//!
//! Mirrors the command/event split of a DevTools websocket connection:
//! commands are request/response, events arrive unsolicited with an optional
//! session identifier naming the target they belong to.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::BridgeError;

/// One raw notification from the transport.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;
    /// Next notification, or `None` when the stream has ended.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, BridgeError> {
        Err(BridgeError::Transport(format!(
            "transport not available for method {method}"
        )))
    }
}

/// Scriptable transport for tests: events are pushed through an mpsc sender,
/// commands are recorded and answered from per-method stub queues.
pub struct MockTransport {
    rx: Mutex<mpsc::Receiver<TransportEvent>>,
    commands: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
}

impl MockTransport {
    pub fn new_pair() -> (std::sync::Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            std::sync::Arc::new(Self {
                rx: Mutex::new(rx),
                commands: Mutex::new(Vec::new()),
                responses: Mutex::new(HashMap::new()),
            }),
            tx,
        )
    }

    pub async fn stub_response(&self, method: &str, value: Value) {
        self.responses
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(value));
    }

    pub async fn stub_error(&self, method: &str, message: &str) {
        self.responses
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub async fn sent_commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().await.clone()
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.rx.lock().await;
        guard.recv().await
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        self.commands
            .lock()
            .await
            .push((method.to_string(), params));
        let stubbed = self
            .responses
            .lock()
            .await
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        match stubbed {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(BridgeError::Transport(message)),
            None => Ok(Value::Object(Default::default())),
        }
    }
}
