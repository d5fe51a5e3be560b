use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use voxpersona_llm::TokenCounter;
use voxpersona_storage::ReportGroup;

use crate::embed::Embedder;
use crate::error::{RagError, Result};
use crate::index::RagIndex;

/// Owns the live RAG index set: builds indices from grouped audit corpora,
/// serves top-k retrieval, and snapshots to / restores from disk.
///
/// Many concurrent queries share the read lock; a rebuild swaps the scope's
/// index under the write lock. The snapshot daemon only ever takes
/// read-locked handles — ownership stays here.
pub struct IndexManager {
    indices: RwLock<HashMap<String, Arc<RagIndex>>>,
    root: PathBuf,
    embedder: Arc<dyn Embedder>,
    counter: Arc<TokenCounter>,
    chunk_tokens: usize,
    chunk_overlap: usize,
}

impl IndexManager {
    pub fn new(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        counter: Arc<TokenCounter>,
        chunk_tokens: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            root: root.into(),
            embedder,
            counter,
            chunk_tokens,
            chunk_overlap,
        }
    }

    /// Build (or replace) the index for one scope from a corpus.
    pub async fn build(&self, scope_key: &str, corpus: &str) -> Arc<RagIndex> {
        let index = Arc::new(RagIndex::build(
            scope_key,
            corpus,
            self.chunk_tokens,
            self.chunk_overlap,
            &self.counter,
            self.embedder.as_ref(),
        ));
        self.indices
            .write()
            .await
            .insert(scope_key.to_string(), index.clone());
        index
    }

    /// Rebuild the whole index set from repository report groups: one scope
    /// per scenario ("interview", "design") holding every report, plus one
    /// per (scenario, report_type) pair.
    pub async fn rebuild_from_reports(&self, groups: &[ReportGroup]) {
        let mut per_scenario: HashMap<String, Vec<String>> = HashMap::new();
        for group in groups {
            let scope = format!("{}:{}", group.scenario, group.report_type);
            self.build(&scope, &join_reports(&group.texts)).await;
            per_scenario
                .entry(group.scenario.clone())
                .or_default()
                .extend(group.texts.iter().cloned());
        }
        for (scenario, texts) in per_scenario {
            self.build(&scenario, &join_reports(&texts)).await;
        }
        info!(groups = groups.len(), "index set rebuilt from repository");
    }

    /// Top-k chunk texts for a query, in similarity-rank order.
    pub async fn query(&self, scope_key: &str, query: &str, k: usize) -> Result<Vec<String>> {
        let guard = self.indices.read().await;
        let index = guard.get(scope_key).ok_or_else(|| RagError::IndexUnavailable {
            scope: scope_key.to_string(),
        })?;
        let query_vector = self.embedder.embed(query);
        Ok(index
            .query(&query_vector, k)
            .into_iter()
            .map(|c| c.text.clone())
            .collect())
    }

    pub async fn has_scope(&self, scope_key: &str) -> bool {
        self.indices.read().await.contains_key(scope_key)
    }

    pub async fn scopes(&self) -> Vec<String> {
        self.indices.read().await.keys().cloned().collect()
    }

    /// Snapshot every loaded index. Per-index failures are logged and
    /// skipped; returns how many saved cleanly.
    pub async fn save_all(&self) -> usize {
        let snapshot: Vec<Arc<RagIndex>> =
            self.indices.read().await.values().cloned().collect();
        let mut saved = 0;
        for index in snapshot {
            match index.save(&self.root) {
                Ok(()) => saved += 1,
                Err(e) => warn!(scope = %index.scope_key, err = %e, "snapshot failed"),
            }
        }
        saved
    }

    /// Restore every readable snapshot under the root directory. Indices
    /// with a version or embedder mismatch are skipped (they will be
    /// rebuilt from the repository). Returns how many loaded.
    ///
    /// Run this from a startup task: queries against scopes that have not
    /// loaded yet fail fast with `IndexUnavailable` instead of blocking.
    pub async fn load_all(&self) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), err = %e, "no snapshot directory");
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match RagIndex::load(&dir, self.embedder.id()) {
                Ok(index) => {
                    let scope = index.scope_key.clone();
                    debug!(%scope, "snapshot loaded");
                    self.indices.write().await.insert(scope, Arc::new(index));
                    loaded += 1;
                }
                Err(e) => warn!(dir = %dir.display(), err = %e, "snapshot skipped"),
            }
        }
        info!(loaded, "snapshots restored");
        loaded
    }
}

fn join_reports(texts: &[String]) -> String {
    texts
        .iter()
        .map(|t| format!("# Report\n{t}"))
        .collect::<Vec<_>>()
        .join("\n")
}
