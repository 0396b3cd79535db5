//! End-to-end flow tests: scripted transport notifications in, durable
//! batches and bus events out.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};

use capture_engine::{CaptureConfig, CaptureEngine};
use capture_store::{MemoryTrafficStore, TrafficStore};
use cdp_bridge::{CdpTransport, MockTransport, TransportEvent};
use webtap_core_types::{SessionId, TrafficRecord};
use webtap_event_bus::{BusEvent, EventEnvelope};

struct Harness {
    engine: Arc<CaptureEngine>,
    transport: Arc<MockTransport>,
    tx: mpsc::Sender<TransportEvent>,
    backend: Arc<MemoryTrafficStore>,
    events: broadcast::Receiver<EventEnvelope>,
}

async fn start_engine(cfg: CaptureConfig) -> Harness {
    let (transport, tx) = MockTransport::new_pair();
    let backend = MemoryTrafficStore::new();
    let engine = CaptureEngine::new(
        SessionId("conv-1".into()),
        cfg,
        Arc::clone(&transport) as Arc<dyn CdpTransport>,
        Arc::clone(&backend) as Arc<dyn TrafficStore>,
    );
    let events = engine.subscribe();
    engine.start().await.expect("engine start");
    Harness {
        engine,
        transport,
        tx,
        backend,
        events,
    }
}

fn attached(session: &str, target: &str, url: &str) -> TransportEvent {
    TransportEvent {
        method: "Target.attachedToTarget".into(),
        params: json!({
            "sessionId": session,
            "targetInfo": { "targetId": target, "type": "page", "url": url, "title": "page" }
        }),
        session_id: None,
    }
}

fn detached(session: &str) -> TransportEvent {
    TransportEvent {
        method: "Target.detachedFromTarget".into(),
        params: json!({ "sessionId": session }),
        session_id: None,
    }
}

fn network(method: &str, session: &str, params: Value) -> TransportEvent {
    TransportEvent {
        method: method.into(),
        params,
        session_id: Some(session.into()),
    }
}

fn request(id: &str, url: &str, body: Option<&str>) -> Value {
    let mut request = json!({ "url": url, "method": "POST" });
    if let Some(body) = body {
        request["postData"] = json!(body);
    }
    json!({ "requestId": id, "request": request, "type": "XHR" })
}

async fn wait_attached(harness: &mut Harness) {
    timeout(Duration::from_secs(2), async {
        loop {
            let envelope = harness.events.recv().await.expect("bus open");
            if matches!(envelope.event, BusEvent::ConnectionAttached { .. }) {
                break;
            }
        }
    })
    .await
    .expect("attach event");
}

async fn next_captured(harness: &mut Harness) -> (TrafficRecord, bool) {
    timeout(Duration::from_secs(2), async {
        loop {
            let envelope = harness.events.recv().await.expect("bus open");
            if let BusEvent::TrafficCaptured {
                record,
                should_store,
            } = envelope.event
            {
                break (record, should_store);
            }
        }
    })
    .await
    .expect("captured event")
}

#[tokio::test]
async fn full_flow_captures_and_flushes_on_shutdown() {
    let mut harness = start_engine(CaptureConfig::default()).await;
    harness
        .transport
        .stub_response(
            "Network.getResponseBody",
            json!({ "body": "{\"ok\":true}" }),
        )
        .await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.1", "https://api.x.com/v1", Some("{\"q\":1}")),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.responseReceived",
            "sess-1",
            json!({ "requestId": "1.1", "response": { "status": 200, "mimeType": "application/json" } }),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFinished",
            "sess-1",
            json!({ "requestId": "1.1" }),
        ))
        .await
        .expect("send");

    let (record, should_store) = next_captured(&mut harness).await;
    assert!(should_store);
    assert!(record.completed);
    assert_eq!(record.status, Some(200));
    assert_eq!(record.body.as_deref(), Some("{\"ok\":true}"));
    assert_eq!(record.page_url.as_deref(), Some("https://x.com/"));

    harness.engine.shutdown().await;
    assert_eq!(harness.backend.record_count(), 1);

    // Capability enablement happened exactly once per domain.
    let commands = harness.transport.sent_commands().await;
    let enables: Vec<&str> = commands
        .iter()
        .map(|(method, _)| method.as_str())
        .filter(|method| method.ends_with(".enable"))
        .collect();
    assert!(enables.contains(&"Network.enable"));
    assert!(enables.contains(&"Page.enable"));
    assert_eq!(enables.len(), 2);
}

#[tokio::test]
async fn duplicate_attach_does_not_reenable_capabilities() {
    let mut harness = start_engine(CaptureConfig::default()).await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;
    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    let commands = harness.transport.sent_commands().await;
    let network_enables = commands
        .iter()
        .filter(|(method, _)| method == "Network.enable")
        .count();
    assert_eq!(network_enables, 1);
    assert_eq!(harness.engine.registry().connection_count(), 1);

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn navigation_updates_page_url_for_later_captures() {
    let mut harness = start_engine(CaptureConfig::default()).await;
    harness
        .transport
        .stub_response("Network.getResponseBody", json!({ "body": "data" }))
        .await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    harness
        .tx
        .send(network(
            "Page.frameNavigated",
            "sess-1",
            json!({ "frame": { "id": "f-1", "url": "https://x.com/settings" } }),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.1", "https://api.x.com/v1", None),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFinished",
            "sess-1",
            json!({ "requestId": "1.1" }),
        ))
        .await
        .expect("send");

    let (record, _) = next_captured(&mut harness).await;
    assert_eq!(record.page_url.as_deref(), Some("https://x.com/settings"));
    // Navigation alone never refreshes the title.
    assert_eq!(record.page_title.as_deref(), Some("page"));

    harness.engine.shutdown().await;
}

#[tokio::test]
async fn static_asset_requests_are_never_captured() {
    let mut harness = start_engine(CaptureConfig::default()).await;
    harness
        .transport
        .stub_response("Network.getResponseBody", json!({ "body": "data" }))
        .await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    // Static asset first, admitted request second; the capture we observe
    // must be the second one only.
    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            json!({
                "requestId": "1.1",
                "request": { "url": "https://x.com/logo.png", "method": "GET" },
                "type": "Image"
            }),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFinished",
            "sess-1",
            json!({ "requestId": "1.1" }),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.2", "https://api.x.com/v1", None),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFinished",
            "sess-1",
            json!({ "requestId": "1.2" }),
        ))
        .await
        .expect("send");

    let (record, _) = next_captured(&mut harness).await;
    assert_eq!(record.url, "https://api.x.com/v1");

    harness.engine.shutdown().await;
    assert_eq!(harness.backend.record_count(), 1);
}

#[tokio::test]
async fn detach_purges_inflight_without_emission() {
    let mut harness = start_engine(CaptureConfig::default()).await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.1", "https://api.x.com/v1", None),
        ))
        .await
        .expect("send");
    harness.tx.send(detached("sess-1")).await.expect("send");

    timeout(Duration::from_secs(2), async {
        loop {
            let envelope = harness.events.recv().await.expect("bus open");
            if matches!(envelope.event, BusEvent::ConnectionDetached { .. }) {
                break;
            }
        }
    })
    .await
    .expect("detach event");

    assert_eq!(harness.engine.correlator().inflight_count(), 0);
    assert_eq!(harness.engine.registry().connection_count(), 0);

    harness.engine.shutdown().await;
    assert!(harness.backend.batches().is_empty());
}

#[tokio::test]
async fn failed_requests_are_emitted_but_not_stored() {
    let mut harness = start_engine(CaptureConfig::default()).await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.1", "https://api.x.com/v1", None),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFailed",
            "sess-1",
            json!({ "requestId": "1.1", "errorText": "net::ERR_TIMED_OUT" }),
        ))
        .await
        .expect("send");

    let (record, should_store) = next_captured(&mut harness).await;
    assert!(record.failed);
    assert!(!should_store);
    assert_eq!(record.error_text.as_deref(), Some("net::ERR_TIMED_OUT"));

    harness.engine.shutdown().await;
    assert!(harness.backend.batches().is_empty());
}

#[tokio::test]
async fn identical_requests_reach_storage_once() {
    let mut harness = start_engine(CaptureConfig::default()).await;
    harness
        .transport
        .stub_response("Network.getResponseBody", json!({ "body": "r1" }))
        .await;
    harness
        .transport
        .stub_response("Network.getResponseBody", json!({ "body": "r2" }))
        .await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    for id in ["1.1", "1.2"] {
        harness
            .tx
            .send(network(
                "Network.requestWillBeSent",
                "sess-1",
                request(id, "https://api.x.com/v1", Some("{\"q\":1}")),
            ))
            .await
            .expect("send");
        harness
            .tx
            .send(network(
                "Network.loadingFinished",
                "sess-1",
                json!({ "requestId": id }),
            ))
            .await
            .expect("send");
    }

    let _ = next_captured(&mut harness).await;
    let _ = next_captured(&mut harness).await;

    harness.engine.shutdown().await;
    assert_eq!(harness.backend.record_count(), 1);
}

#[tokio::test]
async fn storage_fault_surfaces_as_capture_error() {
    let mut harness = start_engine(CaptureConfig::default()).await;
    harness
        .transport
        .stub_response("Network.getResponseBody", json!({ "body": "data" }))
        .await;

    harness
        .tx
        .send(attached("sess-1", "t-1", "https://x.com/"))
        .await
        .expect("send");
    wait_attached(&mut harness).await;

    harness
        .tx
        .send(network(
            "Network.requestWillBeSent",
            "sess-1",
            request("1.1", "https://api.x.com/v1", None),
        ))
        .await
        .expect("send");
    harness
        .tx
        .send(network(
            "Network.loadingFinished",
            "sess-1",
            json!({ "requestId": "1.1" }),
        ))
        .await
        .expect("send");
    let _ = next_captured(&mut harness).await;

    harness.backend.fail_next_write("disk full");
    harness.engine.shutdown().await;

    let error = timeout(Duration::from_secs(2), async {
        loop {
            let envelope = harness.events.recv().await.expect("bus open");
            if let BusEvent::CaptureError { message, .. } = envelope.event {
                break message;
            }
        }
    })
    .await
    .expect("capture error event");
    assert!(error.contains("disk full"));
}
