//! Error taxonomy for the translation pipeline.
//!
//! Library code returns these typed errors; binaries and wiring code wrap
//! them in `anyhow` with context.

use std::time::Duration;
use thiserror::Error;

/// How the retry loop should treat a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Surface immediately, never retry.
    Fatal,
    /// Retry after the fixed rate-limit cool-down.
    RateLimited,
    /// Retry with exponential backoff and jitter.
    Transient,
}

#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    #[error("translation provider not configured: {0}")]
    Configuration(String),

    #[error("provider rejected credentials ({status})")]
    Auth { status: u16 },

    #[error("provider rate limit exceeded (429)")]
    RateLimited,

    #[error("provider quota exceeded (456)")]
    QuotaExceeded,

    #[error("transient provider failure ({status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("provider unavailable after {attempts} attempts: {last}")]
    ProviderUnavailable { attempts: u32, last: String },

    #[error("invalid translation request: {0}")]
    Validation(String),

    #[error("circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("provider request timed out")]
    Timeout,

    #[error("cache store failure: {0}")]
    Store(String),
}

impl TranslateError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            TranslateError::RateLimited => RetryClass::RateLimited,
            TranslateError::Transient { .. } | TranslateError::Timeout => RetryClass::Transient,
            _ => RetryClass::Fatal,
        }
    }

    /// Map a non-success HTTP status from the provider onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => TranslateError::Auth { status },
            429 => TranslateError::RateLimited,
            456 => TranslateError::QuotaExceeded,
            s if s >= 500 => TranslateError::Transient {
                status: Some(s),
                message: body,
            },
            s => TranslateError::Validation(format!("provider returned {}: {}", s, body)),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, TranslateError::Auth { .. })
    }
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TranslateError::Timeout
        } else {
            TranslateError::Transient {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl From<StoreError> for TranslateError {
    fn from(err: StoreError) -> Self {
        TranslateError::Store(err.to_string())
    }
}

/// Durable store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum GlossaryError {
    #[error("invalid glossary term: {0}")]
    Validation(String),

    #[error("glossary term not found: {source_text} ({language})")]
    NotFound {
        source_text: String,
        language: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for GlossaryError {
    fn from(err: sqlx::Error) -> Self {
        GlossaryError::Store(StoreError::Database(err))
    }
}

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("offline store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("offline snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to fetch glossary snapshot: {0}")]
    Fetch(String),
}

impl From<sqlx::Error> for OfflineError {
    fn from(err: sqlx::Error) -> Self {
        OfflineError::Store(StoreError::Database(err))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("no translation state for {entity_type} {entity_id}")]
    NotFound {
        entity_type: String,
        entity_id: String,
    },

    #[error("translation pipeline is stopped")]
    Stopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            TranslateError::from_status(401, String::new()),
            TranslateError::Auth { status: 401 }
        ));
        assert!(matches!(
            TranslateError::from_status(403, String::new()),
            TranslateError::Auth { status: 403 }
        ));
        assert!(matches!(
            TranslateError::from_status(429, String::new()),
            TranslateError::RateLimited
        ));
        assert!(matches!(
            TranslateError::from_status(456, String::new()),
            TranslateError::QuotaExceeded
        ));
        assert!(matches!(
            TranslateError::from_status(503, "busy".into()),
            TranslateError::Transient {
                status: Some(503),
                ..
            }
        ));
        assert!(matches!(
            TranslateError::from_status(400, String::new()),
            TranslateError::Validation(_)
        ));
    }

    #[test]
    fn test_retry_classes() {
        assert_eq!(
            TranslateError::Auth { status: 401 }.retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(TranslateError::QuotaExceeded.retry_class(), RetryClass::Fatal);
        assert_eq!(
            TranslateError::Validation("x".into()).retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            TranslateError::Configuration("x".into()).retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(
            TranslateError::RateLimited.retry_class(),
            RetryClass::RateLimited
        );
        assert_eq!(TranslateError::Timeout.retry_class(), RetryClass::Transient);
        assert_eq!(
            TranslateError::Transient {
                status: None,
                message: "connection reset".into()
            }
            .retry_class(),
            RetryClass::Transient
        );
    }

    #[test]
    fn test_error_messages() {
        let err = TranslateError::ProviderUnavailable {
            attempts: 3,
            last: "503".into(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(TranslateError::Auth { status: 401 }.is_auth());
        assert!(!TranslateError::RateLimited.is_auth());
    }
}
