//! Shared primitives for the webtap capture engine.
//!
//! Identifiers, the immutable [`TrafficRecord`] output unit, and the shared
//! [`TapError`] used at crate boundaries.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type carried across crate boundaries.
#[derive(Debug, Error, Clone)]
pub enum TapError {
    #[error("{message}")]
    Message { message: String },
}

impl TapError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Conversation/session identifier supplied by the hosting agent.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical connection identifier (one browsable target/tab).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque request identifier, unique only within one connection's lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier attached to every bus event envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource classification reported by the protocol for each request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Fetch,
    WebSocket,
    Other,
}

impl ResourceType {
    /// Parses the protocol's resource-type string, case-insensitively.
    /// Unknown values map to [`ResourceType::Other`].
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "stylesheet" => Self::Stylesheet,
            "image" => Self::Image,
            "media" => Self::Media,
            "font" => Self::Font,
            "script" => Self::Script,
            "xhr" => Self::Xhr,
            "fetch" => Self::Fetch,
            "websocket" => Self::WebSocket,
            _ => Self::Other,
        }
    }
}

/// Immutable snapshot of one fully correlated request/response exchange.
///
/// Built exactly once, at finalization; downstream consumers receive clones
/// and never mutate it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub session: SessionId,
    pub target: TargetId,
    pub request_id: RequestId,
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub resource_type: ResourceType,
    pub initiator: Option<String>,
    pub status: Option<i64>,
    pub status_text: Option<String>,
    pub response_headers: HashMap<String, String>,
    pub mime_type: Option<String>,
    pub body: Option<String>,
    pub body_truncated: bool,
    pub original_body_size: u64,
    /// Set when the body fetch failed and the record was kept in degraded form.
    pub fetch_error: Option<String>,
    pub completed: bool,
    pub failed: bool,
    pub error_text: Option<String>,
    pub content_hash: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Stable content hash over the dedup projection of a request:
/// `method|url|request_body`, hex-encoded SHA-256.
pub fn content_hash(method: &str, url: &str, request_body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    if let Some(body) = request_body {
        hasher.update(body.as_bytes());
    }
    hex::encode(hasher.finalize())
}
