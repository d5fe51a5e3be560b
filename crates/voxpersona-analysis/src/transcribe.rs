use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use voxpersona_core::types::Mode;
use voxpersona_prompts::{PromptStage, PromptStore, ASSIGN_ROLES};
use voxpersona_storage::{AuditRepository, Transcription};

use crate::chain::ChainExecutor;
use crate::error::{AnalysisError, Result};

/// External ASR provider: one transcript per audio window. Windowing is
/// the caller's job; the provider's own retry behaviour is not relied on.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, window: &[u8]) -> Result<String>;
}

/// Raw audio plus the byte rate needed to cut it into time windows.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    /// Bytes per second of audio (codec-dependent, supplied by the uploader).
    pub byte_rate: u32,
}

impl AudioBlob {
    /// Fixed-size windows of roughly `window_ms` of audio each. Bounds both
    /// the per-request payload and peak memory.
    pub fn windows(&self, window_ms: u64) -> impl Iterator<Item = &[u8]> {
        let window_bytes = ((self.byte_rate as u64 * window_ms) / 1000).max(1) as usize;
        self.bytes.chunks(window_bytes)
    }
}

/// Converts audio to labelled dialogue: windowed ASR, then (for interviews)
/// a single-stage role-assignment chain. Idempotent per source name — a
/// re-upload reuses the stored transcription and never re-runs ASR.
pub struct Transcriber {
    asr: Arc<dyn SpeechToText>,
    prompts: Arc<PromptStore>,
    executor: Arc<ChainExecutor>,
    repo: Arc<AuditRepository>,
    window_ms: u64,
}

impl Transcriber {
    pub fn new(
        asr: Arc<dyn SpeechToText>,
        prompts: Arc<PromptStore>,
        executor: Arc<ChainExecutor>,
        repo: Arc<AuditRepository>,
        window_ms: u64,
    ) -> Self {
        Self {
            asr,
            prompts,
            executor,
            repo,
            window_ms,
        }
    }

    pub async fn transcribe_and_label(
        &self,
        blob: &AudioBlob,
        source_name: &str,
        mode: Mode,
        deadline: Instant,
    ) -> Result<Transcription> {
        if let Some(existing) = self.repo.find_transcription(source_name)? {
            info!(source_name, id = existing.id, "transcription reused; skipping ASR");
            return Ok(existing);
        }

        let mut parts = Vec::new();
        for window in blob.windows(self.window_ms) {
            parts.push(self.asr.transcribe(window).await?);
        }
        let raw = parts.join(" ");
        debug!(source_name, windows = parts.len(), chars = raw.len(), "ASR finished");

        if raw.trim().is_empty() {
            return Err(AnalysisError::InvalidInput(format!(
                "empty transcription for {source_name}"
            )));
        }

        let labelled = match mode {
            Mode::Interview => {
                let prompt = self.prompts.resolve_named(ASSIGN_ROLES)?;
                let stage = PromptStage {
                    prompt_id: 0,
                    text: prompt,
                    run_part: 1,
                    is_json: false,
                };
                self.executor
                    .run(std::slice::from_ref(&stage), &raw, deadline)
                    .await?
            }
            Mode::Design => raw,
        };

        self.repo.upsert_transcription(source_name, &labelled)?;
        self.repo
            .find_transcription(source_name)?
            .ok_or_else(|| AnalysisError::Internal("transcription vanished after insert".to_string()))
    }
}
