use thiserror::Error;

use webtap_core_types::TapError;

#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("transport fault: {0}")]
    Transport(String),
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("bridge already started")]
    AlreadyStarted,
    #[error("bridge closed")]
    Closed,
}

impl BridgeError {
    pub fn into_tap_error(self) -> TapError {
        TapError::new(self.to_string())
    }
}
