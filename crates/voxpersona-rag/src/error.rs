use thiserror::Error;

use voxpersona_llm::{GatewayError, PoolError};
use voxpersona_prompts::PromptError;
use voxpersona_storage::StorageError;

#[derive(Debug, Error)]
pub enum RagError {
    /// The classifier could not map the query to any scope.
    #[error("query could not be routed to a scope")]
    Unrouted,

    /// The scope's index has not been built or loaded yet.
    #[error("index unavailable for scope: {scope}")]
    IndexUnavailable { scope: String },

    #[error("deep search cancelled")]
    Cancelled,

    #[error("prompt store: {0}")]
    Prompt(#[from] PromptError),

    #[error("credential pool: {0}")]
    Pool(#[from] PoolError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Short user-facing summary; the front-end owns the final wording.
    pub fn summary(&self) -> &'static str {
        match self {
            RagError::Unrouted => "Not routed",
            RagError::Pool(PoolError::Timeout) => "Timed out",
            RagError::Gateway(_) | RagError::Pool(_) => "LLM unavailable",
            RagError::IndexUnavailable { .. }
            | RagError::Cancelled
            | RagError::Prompt(_)
            | RagError::Storage(_)
            | RagError::Snapshot(_)
            | RagError::Io(_) => "Bad data",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
