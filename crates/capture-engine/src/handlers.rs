use std::sync::Arc;

use async_trait::async_trait;

use capture_store::{CaptureStore, StageOutcome};
use webtap_event_bus::{BusError, BusEvent, EventHandler};

/// Stages storable records as they are captured. Registered on the bus for
/// `TrafficCaptured`; the dedup verdict happens inside the store.
pub struct StoreHandler {
    store: Arc<CaptureStore>,
}

impl StoreHandler {
    pub fn new(store: Arc<CaptureStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl EventHandler for StoreHandler {
    fn name(&self) -> &'static str {
        "store-stage"
    }

    async fn handle(&self, event: &BusEvent) -> Result<(), BusError> {
        if let BusEvent::TrafficCaptured {
            record,
            should_store,
        } = event
        {
            if *should_store {
                // Duplicate and Disabled outcomes are normal operation, not
                // handler failures.
                match self.store.stage(record) {
                    StageOutcome::Staged | StageOutcome::Duplicate | StageOutcome::Disabled => {}
                }
            }
        }
        Ok(())
    }
}
