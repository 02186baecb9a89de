use serde::Serialize;
use thiserror::Error;

/// Step-level errors raised while executing a single node attempt.
///
/// The kind decides retryability: transient failures, timeouts and rate
/// limits are retried with backoff; configuration errors are final on first
/// occurrence; a schema-invalid provider payload is granted one extra
/// attempt before becoming final.
#[derive(Debug, Error, Clone)]
pub enum StepError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("attempt timed out")]
    Timeout,
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification of a [`StepError`], carried on events and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Transient,
    Timeout,
    RateLimited,
    Configuration,
    InvalidResponse,
}

impl StepError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::Transient(_) => StepErrorKind::Transient,
            StepError::Timeout => StepErrorKind::Timeout,
            StepError::RateLimited { .. } => StepErrorKind::RateLimited,
            StepError::Configuration(_) => StepErrorKind::Configuration,
            StepError::InvalidResponse(_) => StepErrorKind::InvalidResponse,
        }
    }

    /// Provider-supplied backoff hint, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            StepError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

impl StepErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::Transient => "transient",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::RateLimited => "rate_limited",
            StepErrorKind::Configuration => "configuration",
            StepErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            StepError::Transient("x".into()).kind(),
            StepErrorKind::Transient
        );
        assert_eq!(StepError::Timeout.kind(), StepErrorKind::Timeout);
        assert_eq!(
            StepError::Configuration("bad key".into()).kind(),
            StepErrorKind::Configuration
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = StepError::RateLimited {
            retry_after_secs: Some(7),
            message: "slow down".into(),
        };
        assert_eq!(err.retry_after_secs(), Some(7));
        assert_eq!(StepError::Timeout.retry_after_secs(), None);
    }
}
