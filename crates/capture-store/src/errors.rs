use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend fault: {0}")]
    Backend(String),
    #[error("store closed")]
    Closed,
}

impl StoreError {
    pub fn into_tap_error(self) -> webtap_core_types::TapError {
        webtap_core_types::TapError::new(self.to_string())
    }
}
