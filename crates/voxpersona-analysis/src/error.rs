use thiserror::Error;

use voxpersona_llm::{GatewayError, PoolError};
use voxpersona_prompts::PromptError;
use voxpersona_storage::StorageError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("prompt store: {0}")]
    Prompt(#[from] PromptError),

    #[error("credential pool: {0}")]
    Pool(#[from] PoolError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("ASR provider: {0}")]
    Asr(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Short user-facing summary. The front-end owns the final wording;
    /// this is only the default mapping of kinds to messages.
    pub fn summary(&self) -> &'static str {
        match self {
            AnalysisError::Gateway(_) | AnalysisError::Asr(_) => "LLM unavailable",
            AnalysisError::Pool(PoolError::Timeout) => "Timed out",
            AnalysisError::Pool(_) => "LLM unavailable",
            AnalysisError::Prompt(_)
            | AnalysisError::Storage(_)
            | AnalysisError::InvalidInput(_)
            | AnalysisError::Internal(_) => "Bad data",
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
