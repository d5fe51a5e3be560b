pub mod anthropic;
pub mod backend;
pub mod error;
pub mod gateway;
pub mod pool;
pub mod tokens;
pub mod types;

pub use backend::{BackendError, ChatBackend};
pub use error::{GatewayError, PoolError};
pub use gateway::LlmGateway;
pub use pool::{CallStatus, Credential, CredentialPermit, CredentialPool, QueueClass};
pub use tokens::TokenCounter;
pub use types::{ChatMessage, ChatOutcome, ChatRequest, ChatRole};
