use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use voxpersona_llm::{
    CallStatus, ChatMessage, CredentialPool, LlmGateway, TokenCounter,
};
use voxpersona_prompts::PromptStage;

use crate::error::{AnalysisError, Result};

/// Runs an ordered prompt chain: each stage's output becomes the next
/// stage's input, replacing it entirely. Stages are strictly sequential;
/// the first failing stage aborts the chain with its error.
pub struct ChainExecutor {
    gateway: Arc<LlmGateway>,
    pool: Arc<CredentialPool>,
    counter: Arc<TokenCounter>,
}

impl ChainExecutor {
    pub fn new(
        gateway: Arc<LlmGateway>,
        pool: Arc<CredentialPool>,
        counter: Arc<TokenCounter>,
    ) -> Self {
        Self {
            gateway,
            pool,
            counter,
        }
    }

    pub async fn run(
        &self,
        stages: &[PromptStage],
        input: &str,
        deadline: Instant,
    ) -> Result<String> {
        if stages.is_empty() {
            return Err(AnalysisError::Internal(
                "prompt chain has no stages".to_string(),
            ));
        }

        let mut text = input.to_string();
        for (i, stage) in stages.iter().enumerate() {
            let message = if i == 0 {
                format!("{}\n\n{}", stage.text, text)
            } else {
                format!("{}\n\nText:\n{}", stage.text, text)
            };
            debug!(stage = i, prompt_id = stage.prompt_id, "running chain stage");
            text = self.call(&message, deadline).await?;
        }
        Ok(text)
    }

    /// One budgeted call through the interactive queue.
    pub(crate) async fn call(&self, message: &str, deadline: Instant) -> Result<String> {
        let messages = [ChatMessage::user(message)];
        let estimate = self.counter.estimate_request(None, &messages);
        let permit = self.pool.acquire(estimate, deadline).await?;
        match self
            .gateway
            .complete(None, &messages, permit.credential())
            .await
        {
            Ok(outcome) => {
                let actual = outcome.total_tokens();
                permit.release(actual, CallStatus::Ok);
                Ok(outcome.content)
            }
            Err(e) => {
                // The request reached the provider; the budget stays spent.
                permit.release(0, CallStatus::Failed);
                Err(e.into())
            }
        }
    }
}
