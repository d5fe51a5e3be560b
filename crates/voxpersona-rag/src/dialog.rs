use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voxpersona_llm::{
    CallStatus, ChatMessage, CredentialPool, LlmGateway, TokenCounter,
};
use voxpersona_prompts::{PromptStore, CLASSIFY};

use crate::error::{RagError, Result};
use crate::manager::IndexManager;

/// Answers free-form dialog queries: classifies the query to one RAG scope,
/// retrieves, and produces a grounded answer.
///
/// Fast mode is a single retrieval plus one LLM call. Deep mode fans out
/// one extraction call per candidate chunk through the pool's bulk queue,
/// then synthesises; the aggregation always sees extracts in similarity-rank
/// order, never finish order.
pub struct DialogAnswerer {
    prompts: Arc<PromptStore>,
    gateway: Arc<LlmGateway>,
    pool: Arc<CredentialPool>,
    counter: Arc<TokenCounter>,
    indices: Arc<IndexManager>,
    topk_fast: usize,
    topk_deep: usize,
    deep_workers: usize,
}

impl DialogAnswerer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prompts: Arc<PromptStore>,
        gateway: Arc<LlmGateway>,
        pool: Arc<CredentialPool>,
        counter: Arc<TokenCounter>,
        indices: Arc<IndexManager>,
        topk_fast: usize,
        topk_deep: usize,
        deep_workers: usize,
    ) -> Self {
        Self {
            prompts,
            gateway,
            pool,
            counter,
            indices,
            topk_fast,
            topk_deep,
            deep_workers,
        }
    }

    pub async fn answer(
        &self,
        query: &str,
        deep: bool,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<String> {
        let scope = self.classify(query, deadline).await?;
        info!(%scope, deep, "query routed");
        if deep {
            self.deep_answer(&scope, query, deadline, cancel).await
        } else {
            self.fast_answer(&scope, query, deadline).await
        }
    }

    /// Run the classification prompt and normalise its output to a scope
    /// label. Empty output and the literal `undefined` both mean the
    /// classifier could not route the query.
    async fn classify(&self, query: &str, deadline: Instant) -> Result<String> {
        let prompt = self.prompts.resolve_named(CLASSIFY)?;
        let reply = self
            .call_interactive(&format!("{prompt}\n\n{query}"), deadline)
            .await?;
        let label = reply.trim().to_lowercase();
        if label.is_empty() || label == "undefined" {
            return Err(RagError::Unrouted);
        }
        Ok(label)
    }

    async fn fast_answer(&self, scope: &str, query: &str, deadline: Instant) -> Result<String> {
        let chunks = self.indices.query(scope, query, self.topk_fast).await?;
        let context = chunks.join("\n\n");
        let message = format!(
            "Answer the question using only the report excerpts below.\n\n\
             {context}\n\nQuestion: {query}"
        );
        self.call_interactive(&message, deadline).await
    }

    async fn deep_answer(
        &self,
        scope: &str,
        query: &str,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Result<String> {
        let chunks = self.indices.query(scope, query, self.topk_deep).await?;
        let total = chunks.len();
        debug!(scope, candidates = total, "deep search fan-out");

        // Bounded worker pool over a (rank, chunk) queue. Results land in a
        // rank-indexed table so the aggregation order is the similarity
        // rank, whatever order the calls finish in.
        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(chunks.into_iter().enumerate().collect()));
        let results: Arc<Mutex<Vec<Option<String>>>> =
            Arc::new(Mutex::new(vec![None; total]));
        let first_err: Arc<Mutex<Option<RagError>>> = Arc::new(Mutex::new(None));

        let workers = self.deep_workers.min(total).max(1);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let queue = queue.clone();
            let results = results.clone();
            let first_err = first_err.clone();
            let cancel = cancel.clone();
            let pool = self.pool.clone();
            let gateway = self.gateway.clone();
            let counter = self.counter.clone();
            let query = query.to_string();

            handles.push(tokio::spawn(async move {
                loop {
                    // Cancelled: pending stages withdraw; the stage already
                    // in flight below always runs to completion so the
                    // budget accounting stays honest.
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().unwrap().pop_front();
                    let Some((rank, chunk)) = next else { break };

                    let message = format!(
                        "Question: {query}\n\nExcerpt:\n{chunk}\n\n\
                         Quote every passage of the excerpt that bears on the question."
                    );
                    let messages = vec![ChatMessage::user(message)];
                    let estimate = counter.estimate_request(None, &messages);
                    let permit = match pool.acquire_bulk(estimate, deadline).await {
                        Ok(p) => p,
                        Err(e) => {
                            first_err.lock().unwrap().get_or_insert(e.into());
                            break;
                        }
                    };
                    match gateway.complete(None, &messages, permit.credential()).await {
                        Ok(out) => {
                            permit.release(out.total_tokens(), CallStatus::Ok);
                            results.lock().unwrap()[rank] = Some(out.content);
                        }
                        Err(e) => {
                            permit.release(0, CallStatus::Failed);
                            first_err.lock().unwrap().get_or_insert(e.into());
                            break;
                        }
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        if let Some(err) = first_err.lock().unwrap().take() {
            return Err(err);
        }

        let findings = {
            let results = results.lock().unwrap();
            results
                .iter()
                .flatten()
                .enumerate()
                .map(|(i, text)| format!("{}. {text}", i + 1))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let message = format!(
            "Question: {query}\n\nFindings, in relevance order:\n{findings}\n\n\
             Combine the findings into one grounded answer."
        );
        self.call_interactive(&message, deadline).await
    }

    /// One budgeted call through the interactive queue.
    async fn call_interactive(&self, message: &str, deadline: Instant) -> Result<String> {
        let messages = [ChatMessage::user(message)];
        let estimate = self.counter.estimate_request(None, &messages);
        let permit = self.pool.acquire(estimate, deadline).await?;
        match self
            .gateway
            .complete(None, &messages, permit.credential())
            .await
        {
            Ok(out) => {
                permit.release(out.total_tokens(), CallStatus::Ok);
                Ok(out.content)
            }
            Err(e) => {
                permit.release(0, CallStatus::Failed);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use voxpersona_llm::{
        BackendError, ChatBackend, ChatOutcome, ChatRequest, Credential,
    };

    use crate::embed::Embedder;

    /// Embeds `cN` markers at increasing angles so rank order is c1..cN;
    /// everything else (queries) embeds at angle zero.
    struct RankEmbedder;

    impl Embedder for RankEmbedder {
        fn id(&self) -> &str {
            "rank-test"
        }
        fn embed(&self, text: &str) -> Vec<f32> {
            match (1..=9).find(|n| text.contains(&format!("c{n}"))) {
                Some(n) => {
                    let theta = n as f32 * 0.1;
                    vec![theta.cos(), theta.sin()]
                }
                None => vec![1.0, 0.0],
            }
        }
    }

    /// Scripted provider: classification replies with a fixed label,
    /// per-chunk extractions reply `E<n>` after a per-marker delay, and the
    /// synthesis call is recorded and replies "final".
    struct DeepBackend {
        scope_label: &'static str,
        delays_ms: Vec<(usize, u64)>,
        calls: AtomicU32,
        synthesis_seen: Mutex<Option<String>>,
        fast_seen: Mutex<Option<String>>,
    }

    impl DeepBackend {
        fn new(scope_label: &'static str, delays_ms: Vec<(usize, u64)>) -> Self {
            Self {
                scope_label,
                delays_ms,
                calls: AtomicU32::new(0),
                synthesis_seen: Mutex::new(None),
                fast_seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for DeepBackend {
        fn name(&self) -> &str {
            "deep"
        }

        async fn send(
            &self,
            req: &ChatRequest,
            _credential: &Credential,
        ) -> std::result::Result<ChatOutcome, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = req.messages[0].content.clone();
            let reply = if content.contains("route this query") {
                self.scope_label.to_string()
            } else if content.contains("Excerpt:") {
                let n = (1..=9)
                    .find(|n| content.contains(&format!("c{n}")))
                    .unwrap_or(0);
                if let Some((_, ms)) = self.delays_ms.iter().find(|(m, _)| *m == n) {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                format!("E{n}")
            } else if content.contains("Findings, in relevance order:") {
                *self.synthesis_seen.lock().unwrap() = Some(content);
                "final".to_string()
            } else {
                *self.fast_seen.lock().unwrap() = Some(content);
                "fast-answer".to_string()
            };
            Ok(ChatOutcome {
                content: reply,
                tokens_in: 30,
                tokens_out: 10,
            })
        }
    }

    fn answerer(
        backend: Arc<DeepBackend>,
        creds: u32,
        dir: &std::path::Path,
    ) -> (DialogAnswerer, Arc<IndexManager>) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        voxpersona_prompts::db::init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO named_prompt (name, text) VALUES (?1, 'route this query')",
            rusqlite::params![CLASSIFY],
        )
        .unwrap();
        let prompts = Arc::new(PromptStore::new(conn));

        let counter = Arc::new(TokenCounter::for_model("test-model"));
        let indices = Arc::new(IndexManager::new(
            dir,
            Arc::new(RankEmbedder),
            counter.clone(),
            1000,
            100,
        ));
        let pool = Arc::new(CredentialPool::new(
            (1..=creds)
                .map(|id| Credential {
                    id,
                    secret: format!("k{id}"),
                    tpm: 1_000_000,
                    rpm: 10_000,
                })
                .collect(),
        ));
        let gateway = Arc::new(LlmGateway::new(backend, "test-model", 256));

        (
            DialogAnswerer::new(prompts, gateway, pool, counter, indices.clone(), 2, 5, 5),
            indices,
        )
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    async fn seed_chunks(indices: &IndexManager, scope: &str, n: usize) {
        let corpus = (1..=n)
            .map(|i| format!("# R\nc{i} finding number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        indices.build(scope, &corpus).await;
    }

    #[tokio::test(start_paused = true)]
    async fn deep_aggregation_preserves_rank_order() {
        let backend = Arc::new(DeepBackend::new(
            "interview",
            vec![(1, 100), (2, 10), (3, 200), (4, 50), (5, 30)],
        ));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, indices) = answerer(backend.clone(), 5, dir.path());
        seed_chunks(&indices, "interview", 5).await;

        let out = answerer
            .answer("q", true, far(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "final");

        let synthesis = backend.synthesis_seen.lock().unwrap().clone().unwrap();
        let expected = "1. E1\n2. E2\n3. E3\n4. E4\n5. E5";
        assert!(
            synthesis.contains(expected),
            "synthesis saw findings out of rank order:\n{synthesis}"
        );
    }

    #[tokio::test]
    async fn unroutable_query_stops_after_classification() {
        let backend = Arc::new(DeepBackend::new("undefined", vec![]));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, indices) = answerer(backend.clone(), 2, dir.path());
        seed_chunks(&indices, "interview", 3).await;

        let err = answerer
            .answer("?", false, far(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Unrouted));
        // Only the classification call went out.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_classification_is_unrouted_too() {
        let backend = Arc::new(DeepBackend::new("  ", vec![]));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, _indices) = answerer(backend, 2, dir.path());
        let err = answerer
            .answer("?", false, far(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Unrouted));
    }

    #[tokio::test]
    async fn fast_mode_uses_top_k_in_one_call() {
        let backend = Arc::new(DeepBackend::new("interview", vec![]));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, indices) = answerer(backend.clone(), 2, dir.path());
        seed_chunks(&indices, "interview", 4).await;

        let out = answerer
            .answer("q", false, far(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "fast-answer");
        // Classification + one answer call.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);

        // topk_fast = 2: the two best-ranked chunks, nothing beyond.
        let seen = backend.fast_seen.lock().unwrap().clone().unwrap();
        assert!(seen.contains("c1") && seen.contains("c2"));
        assert!(!seen.contains("c3"));
    }

    #[tokio::test]
    async fn missing_scope_is_index_unavailable() {
        let backend = Arc::new(DeepBackend::new("interview", vec![]));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, _indices) = answerer(backend, 2, dir.path());
        let err = answerer
            .answer("q", false, far(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn cancelled_deep_search_withdraws_pending_stages() {
        let backend = Arc::new(DeepBackend::new("interview", vec![]));
        let dir = tempfile::tempdir().unwrap();
        let (answerer, indices) = answerer(backend.clone(), 2, dir.path());
        seed_chunks(&indices, "interview", 5).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = answerer.answer("q", true, far(), cancel).await.unwrap_err();
        assert!(matches!(err, RagError::Cancelled));
        // Classification ran; every extraction stage withdrew.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
