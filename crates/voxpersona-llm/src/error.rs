use thiserror::Error;

/// What the gateway surfaces after its internal retry loop is done.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient failures outlasted the retry budget, or the provider is
    /// unreachable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The credential was rejected (401/403). The caller may quarantine it
    /// for the rest of the process; there is no automatic rotation.
    #[error("credential error ({status})")]
    Credential { status: u16 },

    /// Non-transient request failure.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("internal gateway error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    /// No credential could serve the request within the deadline.
    #[error("no credential available within deadline")]
    Timeout,

    /// The pool has no credentials configured.
    #[error("credential pool is empty")]
    Empty,
}
