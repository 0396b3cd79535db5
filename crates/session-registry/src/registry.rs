use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, info, warn};

use cdp_bridge::{CdpTransport, CommandTarget, SessionResolver};
use webtap_core_types::{TapError, TargetId};

use crate::errors::RegistryError;
use crate::metrics;
use crate::model::ConnectionCtx;

/// Seam through which the registry drops in-flight correlation state when a
/// connection goes away. Implemented by the correlator; releasing a
/// connection is the single cleanup point.
pub trait InflightPurge: Send + Sync {
    fn purge_connection(&self, target: &TargetId);
}

/// Tracks the logical connections of one capture session and owns the
/// capability-enablement handshake on each of them.
pub struct SessionRegistry {
    connections: DashMap<TargetId, Arc<RwLock<ConnectionCtx>>>,
    by_session: DashMap<String, TargetId>,
    transport: Arc<dyn CdpTransport>,
    purge: RwLock<Option<Arc<dyn InflightPurge>>>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn CdpTransport>) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            by_session: DashMap::new(),
            transport,
            purge: RwLock::new(None),
        })
    }

    /// Wires the in-flight purge seam. Called once at engine assembly; the
    /// correlator cannot be constructed before the registry.
    pub fn set_purge(&self, purge: Arc<dyn InflightPurge>) {
        *self.purge.write() = Some(purge);
    }

    /// Registers a connection, or returns the existing handle. Idempotent:
    /// a second registration for the same target never resets capabilities
    /// or the attach timestamp.
    pub fn ensure_registered(
        &self,
        target: TargetId,
        cdp_session: &str,
    ) -> Arc<RwLock<ConnectionCtx>> {
        if let Some(existing) = self.connections.get(&target) {
            return Arc::clone(existing.value());
        }
        let ctx = Arc::new(RwLock::new(ConnectionCtx::new(
            target.clone(),
            cdp_session.to_string(),
        )));
        self.connections.insert(target.clone(), Arc::clone(&ctx));
        self.by_session.insert(cdp_session.to_string(), target.clone());
        metrics::set_connection_count(self.connections.len());
        info!(target: "session-registry", connection = %target, "connection registered");
        ctx
    }

    /// Issues `<domain>.enable` on the connection's protocol session, at most
    /// once per (connection, domain). The capability is marked before the
    /// command is sent and rolled back on failure, so a concurrent duplicate
    /// cannot double-send while a retry after failure still can.
    pub async fn enable_capability(
        &self,
        target: &TargetId,
        domain: &str,
    ) -> Result<(), TapError> {
        let ctx = self
            .connections
            .get(target)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RegistryError::NotFound.into_tap_error(format!("connection {target}"))
            })?;

        let cdp_session = {
            let mut guard = ctx.write();
            if !guard.capabilities.insert(domain.to_string()) {
                debug!(
                    target: "session-registry",
                    connection = %target,
                    domain,
                    "capability already enabled"
                );
                return Ok(());
            }
            guard.cdp_session.clone()
        };

        let method = format!("{domain}.enable");
        match self
            .transport
            .send_command(CommandTarget::Session(cdp_session), &method, json!({}))
            .await
        {
            Ok(_) => {
                metrics::record_capability_enabled();
                debug!(target: "session-registry", connection = %target, domain, "capability enabled");
                Ok(())
            }
            Err(err) => {
                ctx.write().capabilities.remove(domain);
                warn!(
                    target: "session-registry",
                    connection = %target,
                    domain,
                    %err,
                    "capability enable failed"
                );
                Err(RegistryError::CapabilityFailed
                    .into_tap_error(format!("{method} on {target}: {err}")))
            }
        }
    }

    pub fn update_page(&self, target: &TargetId, url: Option<String>, title: Option<String>) {
        if let Some(entry) = self.connections.get(target) {
            let mut guard = entry.value().write();
            if url.is_some() {
                guard.page_url = url;
            }
            if title.is_some() {
                guard.page_title = title;
            }
        }
    }

    /// Removes the connection and purges its in-flight correlation state.
    /// Returns false when the target was not registered.
    pub fn release(&self, target: &TargetId) -> bool {
        let Some((_, ctx)) = self.connections.remove(target) else {
            return false;
        };
        let cdp_session = ctx.read().cdp_session.clone();
        self.by_session.remove(&cdp_session);
        if let Some(purge) = self.purge.read().as_ref() {
            purge.purge_connection(target);
        }
        metrics::set_connection_count(self.connections.len());
        metrics::record_release();
        info!(target: "session-registry", connection = %target, "connection released");
        true
    }

    /// Release keyed by the transport's session string, for detach
    /// notifications that carry no target id.
    pub fn release_by_session(&self, cdp_session: &str) -> Option<TargetId> {
        let target = self.by_session.get(cdp_session)?.value().clone();
        self.release(&target);
        Some(target)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn snapshot(&self, target: &TargetId) -> Option<ConnectionCtx> {
        self.connections
            .get(target)
            .map(|entry| entry.value().read().clone())
    }

    pub fn targets(&self) -> Vec<TargetId> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl SessionResolver for SessionRegistry {
    fn resolve(&self, cdp_session: &str) -> Option<TargetId> {
        self.by_session
            .get(cdp_session)
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_bridge::MockTransport;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingPurge {
        purged: StdMutex<Vec<TargetId>>,
    }

    impl InflightPurge for RecordingPurge {
        fn purge_connection(&self, target: &TargetId) {
            self.purged.lock().unwrap().push(target.clone());
        }
    }

    fn target(id: &str) -> TargetId {
        TargetId(id.to_string())
    }

    #[tokio::test]
    async fn double_registration_returns_same_handle() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);

        let first = registry.ensure_registered(target("t-1"), "sess-1");
        let second = registry.ensure_registered(target("t-1"), "sess-1");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn enable_capability_sends_command_once() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(Arc::clone(&transport) as Arc<dyn CdpTransport>);
        registry.ensure_registered(target("t-1"), "sess-1");

        registry
            .enable_capability(&target("t-1"), "Network")
            .await
            .expect("first enable");
        registry
            .enable_capability(&target("t-1"), "Network")
            .await
            .expect("second enable");

        let commands = transport.sent_commands().await;
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "Network.enable");
    }

    #[tokio::test]
    async fn enable_capability_rolls_back_on_transport_error() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.stub_error("Network.enable", "socket closed").await;
        let registry = SessionRegistry::new(Arc::clone(&transport) as Arc<dyn CdpTransport>);
        registry.ensure_registered(target("t-1"), "sess-1");

        let err = registry
            .enable_capability(&target("t-1"), "Network")
            .await
            .err()
            .expect("enable should fail");
        assert!(err.to_string().contains("capability enable failed"));

        // The failed attempt must not poison the capability set.
        registry
            .enable_capability(&target("t-1"), "Network")
            .await
            .expect("retry after failure");
        assert_eq!(transport.sent_commands().await.len(), 2);
    }

    #[tokio::test]
    async fn enable_capability_on_unknown_target_errors() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);

        let err = registry
            .enable_capability(&target("missing"), "Network")
            .await
            .err()
            .expect("should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn release_purges_inflight_state() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);
        let purge = Arc::new(RecordingPurge::default());
        registry.set_purge(Arc::clone(&purge) as Arc<dyn InflightPurge>);
        registry.ensure_registered(target("t-1"), "sess-1");

        assert!(registry.release(&target("t-1")));
        assert!(!registry.release(&target("t-1")));

        assert_eq!(purge.purged.lock().unwrap().as_slice(), &[target("t-1")]);
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.resolve("sess-1").is_none());
    }

    #[tokio::test]
    async fn release_by_session_maps_back_to_target() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);
        registry.ensure_registered(target("t-1"), "sess-1");
        registry.ensure_registered(target("t-2"), "sess-2");

        assert_eq!(registry.release_by_session("sess-2"), Some(target("t-2")));
        assert_eq!(registry.release_by_session("sess-2"), None);
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn resolve_maps_session_to_target() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);
        registry.ensure_registered(target("t-1"), "sess-1");

        assert_eq!(registry.resolve("sess-1"), Some(target("t-1")));
        assert_eq!(registry.resolve("sess-9"), None);
    }

    #[tokio::test]
    async fn update_page_keeps_existing_fields() {
        let (transport, _tx) = MockTransport::new_pair();
        let registry = SessionRegistry::new(transport);
        registry.ensure_registered(target("t-1"), "sess-1");

        registry.update_page(
            &target("t-1"),
            Some("https://x.com/".into()),
            Some("X".into()),
        );
        registry.update_page(&target("t-1"), None, Some("X — home".into()));

        let snapshot = registry.snapshot(&target("t-1")).unwrap();
        assert_eq!(snapshot.page_url.as_deref(), Some("https://x.com/"));
        assert_eq!(snapshot.page_title.as_deref(), Some("X — home"));
    }
}
