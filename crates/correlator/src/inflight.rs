use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use webtap_core_types::ResourceType;

/// Lifecycle phase of an in-flight request. The tag is explicit: completion
/// handling never infers phase from which optional fields happen to be set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Started,
    Responded,
}

#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: i64,
    pub status_text: Option<String>,
    pub headers: HashMap<String, String>,
    pub mime_type: Option<String>,
}

/// One entry in the in-flight table, keyed by (target, request id).
#[derive(Clone, Debug)]
pub struct InflightEntry {
    pub cdp_session: String,
    pub phase: Phase,
    pub method: String,
    pub url: String,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub resource_type: ResourceType,
    pub initiator: Option<String>,
    pub response: Option<ResponseMeta>,
    /// Monotonic start stamp, for duration.
    pub started_at: Instant,
    /// Wall-clock start stamp, carried onto the record.
    pub started_wall: DateTime<Utc>,
    /// Bumped on every lifecycle notification; idle eviction keys off this.
    pub last_touch: Instant,
}
