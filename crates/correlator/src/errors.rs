use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelatorError {
    #[error("body fetch failed: {0}")]
    BodyFetch(String),
    #[error("body decode failed: {0}")]
    BodyDecode(String),
}

impl CorrelatorError {
    pub fn into_tap_error(self) -> webtap_core_types::TapError {
        webtap_core_types::TapError::new(self.to_string())
    }
}
