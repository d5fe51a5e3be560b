use serde::{Deserialize, Serialize};

/// A single message in a provider conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Request to the LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Response from the LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl ChatOutcome {
    /// Total tokens the call actually consumed, for budget accounting.
    pub fn total_tokens(&self) -> u32 {
        self.tokens_in + self.tokens_out
    }
}
