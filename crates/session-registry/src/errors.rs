use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found")]
    NotFound,
    #[error("capability enable failed")]
    CapabilityFailed,
    #[error("internal error")]
    Internal,
}

impl RegistryError {
    pub fn into_tap_error(self, detail: impl Into<String>) -> webtap_core_types::TapError {
        let message = format!("{}: {}", self, detail.into());
        webtap_core_types::TapError::new(message)
    }
}
