use async_trait::async_trait;

use crate::pool::Credential;
use crate::types::{ChatOutcome, ChatRequest};

/// One chat/completion exchange with the provider, no retry policy.
///
/// The gateway owns retries; a backend reports what happened as an explicit
/// variant so the retry loop can branch on the error class instead of
/// string-matching exceptions.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    async fn send(
        &self,
        req: &ChatRequest,
        credential: &Credential,
    ) -> Result<ChatOutcome, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider returned 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Provider returned 529.
    #[error("provider overloaded")]
    Overloaded,

    /// Provider rejected the credential (401/403). Not retried.
    #[error("credential rejected ({status})")]
    CredentialRejected { status: u16 },

    /// Transient provider-side failure (5xx other than 529).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Non-transient request failure (4xx other than 429/401/403).
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl BackendError {
    /// Whether the gateway retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Http(_)
                | BackendError::RateLimited { .. }
                | BackendError::Overloaded
                | BackendError::Server { .. }
        )
    }
}
