use std::collections::HashSet;
use std::time::Instant;

use webtap_core_types::TargetId;

/// Mutable context for one logical connection (one attached page target).
#[derive(Clone, Debug)]
pub struct ConnectionCtx {
    pub target: TargetId,
    pub cdp_session: String,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    /// Protocol domains already enabled on this connection.
    pub capabilities: HashSet<String>,
    pub attached_at: Instant,
}

impl ConnectionCtx {
    pub fn new(target: TargetId, cdp_session: String) -> Self {
        Self {
            target,
            cdp_session,
            page_url: None,
            page_title: None,
            capabilities: HashSet::new(),
            attached_at: Instant::now(),
        }
    }
}
