use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use webtap_core_types::{RequestId, TapError, TargetId, TrafficRecord};

use crate::dedup::DedupIndex;
use crate::errors::StoreError;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// When false, `stage` accepts nothing and `flush` writes nothing.
    pub enabled: bool,
    pub dedup_enabled: bool,
    /// Namespace (collection/table name) passed through to the backend.
    pub namespace: String,
    pub staging_ttl_ms: u64,
    pub dedup_window_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_enabled: true,
            namespace: "captured_traffic".to_string(),
            staging_ttl_ms: 300_000,
            dedup_window_ms: 600_000,
            dedup_capacity: 4_096,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageOutcome {
    Staged,
    Duplicate,
    Disabled,
}

/// Async seam to durable storage. Batch-oriented: the engine flushes once
/// per session, at session end.
#[async_trait]
pub trait TrafficStore: Send + Sync {
    async fn write_batch(
        &self,
        namespace: &str,
        records: Vec<TrafficRecord>,
    ) -> Result<(), StoreError>;
}

/// In-memory backend for tests and embedding.
#[derive(Default)]
pub struct MemoryTrafficStore {
    batches: Mutex<Vec<(String, Vec<TrafficRecord>)>>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryTrafficStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> Vec<(String, Vec<TrafficRecord>)> {
        self.batches.lock().clone()
    }

    pub fn record_count(&self) -> usize {
        self.batches
            .lock()
            .iter()
            .map(|(_, records)| records.len())
            .sum()
    }

    /// Makes the next write fail with the given message.
    pub fn fail_next_write(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }
}

#[async_trait]
impl TrafficStore for MemoryTrafficStore {
    async fn write_batch(
        &self,
        namespace: &str,
        records: Vec<TrafficRecord>,
    ) -> Result<(), StoreError> {
        if let Some(message) = self.fail_next.lock().take() {
            return Err(StoreError::Backend(message));
        }
        self.batches
            .lock()
            .push((namespace.to_string(), records));
        Ok(())
    }
}

struct Staged {
    record: TrafficRecord,
    staged_at: Instant,
}

/// Staging cache plus dedup index in front of a [`TrafficStore`] backend.
///
/// Records accumulate in staging during the session; `flush` performs the
/// single durable batch write and resets both staging and dedup state.
pub struct CaptureStore {
    cfg: StoreConfig,
    dedup: DedupIndex,
    staging: DashMap<(TargetId, RequestId), Staged>,
    backend: Arc<dyn TrafficStore>,
}

impl CaptureStore {
    pub fn new(cfg: StoreConfig, backend: Arc<dyn TrafficStore>) -> Arc<Self> {
        let dedup = DedupIndex::new(
            Duration::from_millis(cfg.dedup_window_ms),
            cfg.dedup_capacity,
        );
        Arc::new(Self {
            cfg,
            dedup,
            staging: DashMap::new(),
            backend,
        })
    }

    /// Stages a finalized record for the end-of-session flush. Duplicate
    /// content (same method, URL and request body) within the dedup window
    /// is dropped here, before it ever reaches the backend.
    pub fn stage(&self, record: &TrafficRecord) -> StageOutcome {
        if !self.cfg.enabled {
            return StageOutcome::Disabled;
        }
        if self.cfg.dedup_enabled && !self.dedup.accept(&record.content_hash) {
            debug!(
                target: "capture-store",
                request = %record.request_id,
                url = %record.url,
                "duplicate content dropped"
            );
            return StageOutcome::Duplicate;
        }
        self.staging.insert(
            (record.target.clone(), record.request_id.clone()),
            Staged {
                record: record.clone(),
                staged_at: Instant::now(),
            },
        );
        StageOutcome::Staged
    }

    pub fn staged_count(&self) -> usize {
        self.staging.len()
    }

    /// Drops staged entries older than the staging TTL. Run from the
    /// engine's maintenance tick.
    pub fn sweep_expired(&self) -> usize {
        let ttl = Duration::from_millis(self.cfg.staging_ttl_ms);
        let now = Instant::now();
        let before = self.staging.len();
        self.staging
            .retain(|_, staged| now.duration_since(staged.staged_at) <= ttl);
        before - self.staging.len()
    }

    /// Writes all unexpired staged records as one batch, then clears staging
    /// and dedup state. Idempotent: with nothing staged it performs no
    /// backend call. Staged records are kept on backend failure so a retry
    /// can still flush them.
    pub async fn flush(&self) -> Result<usize, TapError> {
        self.sweep_expired();
        if self.staging.is_empty() {
            return Ok(0);
        }

        let mut records: Vec<TrafficRecord> = self
            .staging
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by_key(|record| record.started_at);
        let count = records.len();

        self.backend
            .write_batch(&self.cfg.namespace, records)
            .await
            .map_err(StoreError::into_tap_error)?;

        self.staging.clear();
        self.dedup.clear();
        info!(
            target: "capture-store",
            count,
            namespace = %self.cfg.namespace,
            "flushed staged records"
        );
        Ok(count)
    }
}
