use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cdp_bridge::params::{
    GetResponseBodyResult, LoadingFailedParams, LoadingFinishedParams, RequestWillBeSentParams,
    ResponseReceivedParams,
};
use cdp_bridge::{CdpTransport, CommandTarget};
use tap_policy::FilterPolicy;
use webtap_core_types::{content_hash, RequestId, ResourceType, SessionId, TargetId, TrafficRecord};
use webtap_event_bus::{BusEvent, CaptureBus};
use webtap_session_registry::InflightPurge;

use crate::errors::CorrelatorError;
use crate::inflight::{InflightEntry, Phase, ResponseMeta};
use crate::metrics;

#[derive(Clone, Debug)]
pub struct CorrelatorConfig {
    /// Request bodies (POST data) are truncated to this many bytes at entry.
    pub max_request_body_bytes: usize,
    /// Entries untouched for this long are evicted by maintenance.
    pub idle_timeout_ms: u64,
    pub maintenance_interval_ms: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_request_body_bytes: 1_048_576,
            idle_timeout_ms: 120_000,
            maintenance_interval_ms: 5_000,
        }
    }
}

type FlightKey = (TargetId, RequestId);

/// Merges the four lifecycle notifications of each request into one
/// [`TrafficRecord`], emitted exactly once, at terminal transition.
pub struct Correlator {
    session: SessionId,
    cfg: CorrelatorConfig,
    policy: FilterPolicy,
    inflight: DashMap<FlightKey, InflightEntry>,
    transport: Arc<dyn CdpTransport>,
    bus: Arc<CaptureBus>,
}

/// Handle for the idle-eviction loop. Dropping it aborts the task.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Correlator {
    pub fn new(
        session: SessionId,
        cfg: CorrelatorConfig,
        policy: FilterPolicy,
        transport: Arc<dyn CdpTransport>,
        bus: Arc<CaptureBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            cfg,
            policy,
            inflight: DashMap::new(),
            transport,
            bus,
        })
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Request-start notification. Admission runs here, at the earliest
    /// point: a rejected request creates no in-flight entry and costs
    /// nothing downstream. Returns whether the request was admitted.
    pub fn on_request_started(
        &self,
        target: TargetId,
        cdp_session: String,
        params: RequestWillBeSentParams,
        page_url: Option<String>,
        page_title: Option<String>,
    ) -> bool {
        let resource_type = params
            .resource_type
            .as_deref()
            .map(ResourceType::parse)
            .unwrap_or(ResourceType::Other);

        if !tap_policy::admit(&params.request.url, resource_type, &self.policy) {
            metrics::record_rejected();
            debug!(
                target: "correlator",
                url = %params.request.url,
                ?resource_type,
                "request rejected at admission"
            );
            return false;
        }

        let request_body = params
            .request
            .post_data
            .map(|body| truncate_utf8(body, self.cfg.max_request_body_bytes).0);
        let now = Instant::now();
        let entry = InflightEntry {
            cdp_session,
            phase: Phase::Started,
            method: params.request.method,
            url: params.request.url,
            request_headers: params.request.headers,
            request_body,
            page_url: page_url.or(params.document_url),
            page_title,
            resource_type,
            initiator: params.initiator.and_then(|i| i.url.or(Some(i.kind))),
            response: None,
            started_at: now,
            started_wall: Utc::now(),
            last_touch: now,
        };
        self.inflight
            .insert((target, RequestId(params.request_id)), entry);
        metrics::record_admitted();
        metrics::set_inflight(self.inflight.len());
        true
    }

    /// Response-headers notification. Enriches the entry; a miss (late
    /// event, purged connection, never-admitted request) is dropped silently.
    pub fn on_response_received(&self, target: TargetId, params: ResponseReceivedParams) {
        let key = (target, RequestId(params.request_id));
        match self.inflight.get_mut(&key) {
            Some(mut entry) => {
                entry.response = Some(ResponseMeta {
                    status: params.response.status,
                    status_text: params.response.status_text,
                    headers: params.response.headers,
                    mime_type: params.response.mime_type,
                });
                entry.phase = Phase::Responded;
                entry.last_touch = Instant::now();
            }
            None => {
                metrics::record_miss();
                debug!(target: "correlator", request = %key.1, "response for unknown request");
            }
        }
    }

    /// Authoritative completion. The entry is removed before any await so a
    /// duplicate notification cannot finalize twice; the body fetch happens
    /// outside the table. Finishing without a prior response phase still
    /// finalizes, with response fields defaulted.
    pub async fn on_loading_finished(
        &self,
        target: TargetId,
        params: LoadingFinishedParams,
    ) -> Option<TrafficRecord> {
        let request_id = RequestId(params.request_id);
        let Some((_, entry)) = self.inflight.remove(&(target.clone(), request_id.clone())) else {
            metrics::record_miss();
            debug!(target: "correlator", request = %request_id, "finish for unknown request");
            return None;
        };
        metrics::set_inflight(self.inflight.len());

        if entry.phase == Phase::Started {
            debug!(
                target: "correlator",
                request = %request_id,
                "finished without a response phase"
            );
        }

        let (body, body_truncated, original_body_size, fetch_error) =
            match self.fetch_body(&entry.cdp_session, &request_id).await {
                Ok(raw) => {
                    let (body, truncated, original) =
                        truncate_utf8(raw, self.policy.max_response_body_bytes);
                    (Some(body), truncated, original, None)
                }
                Err(err) => {
                    metrics::record_body_fetch_failure();
                    warn!(target: "correlator", request = %request_id, %err, "body fetch failed");
                    (None, false, 0, Some(err.to_string()))
                }
            };

        let mut record = self.base_record(target, request_id, &entry);
        record.completed = true;
        if let Some(response) = entry.response {
            record.status = Some(response.status);
            record.status_text = response.status_text;
            record.response_headers = response.headers;
            record.mime_type = response.mime_type;
        }
        record.body = body;
        record.body_truncated = body_truncated;
        record.original_body_size = original_body_size;
        record.fetch_error = fetch_error;

        let should_store = tap_policy::should_store(&record, &self.policy);
        self.emit(record.clone(), should_store).await;
        Some(record)
    }

    /// Terminal failure. No body fetch; the record is observational only and
    /// never stored.
    pub async fn on_loading_failed(
        &self,
        target: TargetId,
        params: LoadingFailedParams,
    ) -> Option<TrafficRecord> {
        let request_id = RequestId(params.request_id);
        let Some((_, entry)) = self.inflight.remove(&(target.clone(), request_id.clone())) else {
            metrics::record_miss();
            debug!(target: "correlator", request = %request_id, "failure for unknown request");
            return None;
        };
        metrics::set_inflight(self.inflight.len());

        let mut record = self.base_record(target, request_id, &entry);
        record.failed = true;
        record.error_text = Some(params.error_text);
        if let Some(response) = entry.response {
            record.status = Some(response.status);
            record.status_text = response.status_text;
            record.response_headers = response.headers;
            record.mime_type = response.mime_type;
        }

        self.emit(record.clone(), false).await;
        Some(record)
    }

    /// Drops every in-flight entry owned by the connection, without
    /// emission. Invoked by the registry on release.
    pub fn purge(&self, target: &TargetId) {
        let before = self.inflight.len();
        self.inflight.retain(|(owner, _), _| owner != target);
        let dropped = before - self.inflight.len();
        if dropped > 0 {
            metrics::record_evicted(dropped);
            metrics::set_inflight(self.inflight.len());
            debug!(target: "correlator", connection = %target, dropped, "purged in-flight entries");
        }
    }

    /// Evicts entries whose last lifecycle touch is older than the idle
    /// timeout. Nothing is emitted for them.
    pub fn evict_idle(&self) {
        let idle = Duration::from_millis(self.cfg.idle_timeout_ms);
        let now = Instant::now();
        let before = self.inflight.len();
        self.inflight
            .retain(|_, entry| now.saturating_duration_since(entry.last_touch) <= idle);
        let dropped = before - self.inflight.len();
        if dropped > 0 {
            metrics::record_evicted(dropped);
            metrics::set_inflight(self.inflight.len());
            debug!(target: "correlator", dropped, "evicted idle in-flight entries");
        }
    }

    /// Spawns the periodic idle-eviction loop.
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let correlator = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let tick_interval = Duration::from_millis(self.cfg.maintenance_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => correlator.evict_idle(),
                }
            }
        });
        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }

    fn base_record(
        &self,
        target: TargetId,
        request_id: RequestId,
        entry: &InflightEntry,
    ) -> TrafficRecord {
        TrafficRecord {
            session: self.session.clone(),
            target,
            request_id,
            method: entry.method.clone(),
            url: entry.url.clone(),
            request_headers: entry.request_headers.clone(),
            request_body: entry.request_body.clone(),
            page_url: entry.page_url.clone(),
            page_title: entry.page_title.clone(),
            resource_type: entry.resource_type,
            initiator: entry.initiator.clone(),
            status: None,
            status_text: None,
            response_headers: Default::default(),
            mime_type: None,
            body: None,
            body_truncated: false,
            original_body_size: 0,
            fetch_error: None,
            completed: false,
            failed: false,
            error_text: None,
            content_hash: content_hash(&entry.method, &entry.url, entry.request_body.as_deref()),
            started_at: entry.started_wall,
            duration_ms: entry.started_at.elapsed().as_millis() as u64,
        }
    }

    async fn fetch_body(
        &self,
        cdp_session: &str,
        request_id: &RequestId,
    ) -> Result<String, CorrelatorError> {
        let result = self
            .transport
            .send_command(
                CommandTarget::Session(cdp_session.to_string()),
                "Network.getResponseBody",
                json!({ "requestId": request_id.0 }),
            )
            .await
            .map_err(|err| CorrelatorError::BodyFetch(err.to_string()))?;
        let decoded: GetResponseBodyResult = serde_json::from_value(result)
            .map_err(|err| CorrelatorError::BodyDecode(err.to_string()))?;
        if decoded.base64_encoded {
            let bytes = BASE64
                .decode(decoded.body.as_bytes())
                .map_err(|err| CorrelatorError::BodyDecode(err.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(decoded.body)
        }
    }

    async fn emit(&self, record: TrafficRecord, should_store: bool) {
        metrics::record_finalized();
        let handle = self.bus.dispatch(BusEvent::TrafficCaptured {
            record,
            should_store,
        });
        // Awaiting here makes finalization deterministic for callers; the
        // handlers themselves still run with their own timeout.
        if handle.wait().await.is_err() {
            debug!(target: "correlator", "dispatch abandoned during shutdown");
        }
    }
}

impl InflightPurge for Correlator {
    fn purge_connection(&self, target: &TargetId) {
        self.purge(target);
    }
}

/// Byte-bounded truncation that respects UTF-8 boundaries. Returns the
/// possibly-shortened string, whether it was cut, and the original length.
fn truncate_utf8(mut body: String, max: usize) -> (String, bool, u64) {
    let original = body.len() as u64;
    if body.len() <= max {
        return (body, false, original);
    }
    let mut cut = max;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    (body, true, original)
}
