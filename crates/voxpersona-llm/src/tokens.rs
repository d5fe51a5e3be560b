use tiktoken_rs::{cl100k_base, get_bpe_from_model, CoreBPE};
use tracing::warn;

use crate::types::ChatMessage;

/// Safety margin added to every request estimate for budget accounting.
const ESTIMATE_MARGIN: u32 = 10;

/// Tokenizer-backed counter for budget estimates.
///
/// Uses the encoding registered for the configured model, falling back to
/// the generic `cl100k_base` encoder for unknown model names. When even the
/// fallback cannot load, counting degrades to whitespace words.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn for_model(model: &str) -> Self {
        let bpe = get_bpe_from_model(model)
            .ok()
            .or_else(|| cl100k_base().ok());
        if bpe.is_none() {
            warn!(model, "no tokenizer available; falling back to word counts");
        }
        Self { bpe }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.split_whitespace().count(),
        }
    }

    /// Budget estimate for one request: prompt tokens plus a fixed margin.
    pub fn estimate_request(&self, system: Option<&str>, messages: &[ChatMessage]) -> u32 {
        let mut total = system.map(|s| self.count(s)).unwrap_or(0);
        for m in messages {
            total += self.count(&m.content);
        }
        total as u32 + ESTIMATE_MARGIN
    }
}
