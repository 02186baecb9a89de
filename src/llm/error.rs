use thiserror::Error;

use crate::error::StepError;

/// Errors surfaced by provider adapters, before classification into the
/// step-level retry taxonomy.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<AdapterError> for StepError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::ProviderNotFound(msg) => {
                StepError::Configuration(format!("provider not found: {msg}"))
            }
            AdapterError::Authentication(msg) => {
                StepError::Configuration(format!("authentication failed: {msg}"))
            }
            AdapterError::RateLimited { retry_after } => StepError::RateLimited {
                retry_after_secs: retry_after,
                message: "provider rate limit".to_string(),
            },
            AdapterError::Api { status, message } if status >= 500 => {
                StepError::Transient(format!("provider error {status}: {message}"))
            }
            AdapterError::Api { status, message } => {
                StepError::Configuration(format!("provider rejected request {status}: {message}"))
            }
            AdapterError::Network(msg) => StepError::Transient(format!("network error: {msg}")),
            AdapterError::Timeout => StepError::Timeout,
            AdapterError::InvalidResponse(msg) => StepError::InvalidResponse(msg),
            AdapterError::InvalidRequest(msg) => StepError::Configuration(msg),
        }
    }
}
