use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::backend::{BackendError, ChatBackend};
use crate::error::GatewayError;
use crate::pool::Credential;
use crate::types::{ChatMessage, ChatOutcome, ChatRequest};

/// Backoff doublings before giving up: 1, 2, 4, 8, 16 s — worst-case total
/// wait of 31 s, after which `Unavailable` is surfaced.
const BACKOFF_STEPS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// One chat call with retry-on-transient, on a credential chosen upstream.
///
/// Retries are local and invisible to callers: a transient error class
/// (429, 529, other 5xx, network) re-enters the loop with exponential
/// backoff; everything else surfaces immediately.
pub struct LlmGateway {
    backend: Arc<dyn ChatBackend>,
    model: String,
    max_tokens: u32,
}

impl LlmGateway {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            backend,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        credential: &Credential,
    ) -> Result<ChatOutcome, GatewayError> {
        let req = ChatRequest {
            model: self.model.clone(),
            system: system.map(String::from),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
        };

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;
        loop {
            match self.backend.send(&req, credential).await {
                Ok(outcome) => {
                    if attempt > 0 {
                        info!(attempt, "call succeeded after retry");
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_transient() => {
                    if attempt >= BACKOFF_STEPS {
                        warn!(attempt, err = %e, "retry budget exhausted");
                        return Err(GatewayError::Unavailable(e.to_string()));
                    }
                    warn!(attempt, err = %e, backoff_secs = backoff.as_secs(), "transient provider error");
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(BackendError::CredentialRejected { status }) => {
                    return Err(GatewayError::Credential { status });
                }
                Err(BackendError::Api { status, message }) => {
                    return Err(GatewayError::Rejected { status, message });
                }
                Err(e) => return Err(GatewayError::Internal(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails with the given error class K times, then succeeds.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChatBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(
            &self,
            _req: &ChatRequest,
            _credential: &Credential,
        ) -> Result<ChatOutcome, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(BackendError::RateLimited { retry_after_ms: 0 })
            } else {
                Ok(ChatOutcome {
                    content: "ok".to_string(),
                    tokens_in: 10,
                    tokens_out: 5,
                })
            }
        }
    }

    fn cred() -> Credential {
        Credential {
            id: 1,
            secret: "k".to_string(),
            tpm: 1000,
            rpm: 10,
        }
    }

    fn gateway(failures: u32) -> LlmGateway {
        LlmGateway::new(
            Arc::new(FlakyBackend {
                failures,
                calls: AtomicU32::new(0),
            }),
            "test-model",
            256,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn five_rate_limits_then_success_within_31s() {
        let gw = gateway(5);
        let start = Instant::now();
        let out = gw.complete(None, &[ChatMessage::user("hi")], &cred()).await;
        assert_eq!(out.unwrap().content, "ok");
        // 1 + 2 + 4 + 8 + 16 seconds of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn six_rate_limits_surface_unavailable() {
        let gw = gateway(6);
        let err = gw
            .complete(None, &[ChatMessage::user("hi")], &cred())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[tokio::test]
    async fn credential_rejection_is_not_retried() {
        struct Rejecting(AtomicU32);

        #[async_trait]
        impl ChatBackend for Rejecting {
            fn name(&self) -> &str {
                "rejecting"
            }
            async fn send(
                &self,
                _req: &ChatRequest,
                _credential: &Credential,
            ) -> Result<ChatOutcome, BackendError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::CredentialRejected { status: 403 })
            }
        }

        let backend = Arc::new(Rejecting(AtomicU32::new(0)));
        let gw = LlmGateway::new(backend.clone(), "test-model", 256);
        let err = gw
            .complete(None, &[ChatMessage::user("hi")], &cred())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Credential { status: 403 }));
        assert_eq!(backend.0.load(Ordering::SeqCst), 1);
    }
}
