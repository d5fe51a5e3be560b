use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use voxpersona_llm::TokenCounter;

use crate::chunk::chunk_text;
use crate::embed::Embedder;
use crate::error::{RagError, Result};

/// Bumped when the snapshot layout changes; older snapshots are rebuilt
/// from the repository instead of migrated.
pub const SNAPSHOT_VERSION: u32 = 1;

const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub vector: Vec<f32>,
}

/// In-memory similarity index over one scope's corpus.
#[derive(Debug, Serialize, Deserialize)]
pub struct RagIndex {
    pub scope_key: String,
    pub embedder_id: String,
    version: u32,
    chunks: Vec<IndexedChunk>,
}

impl RagIndex {
    /// Chunk and embed a corpus into a fresh index.
    pub fn build(
        scope_key: &str,
        corpus: &str,
        chunk_tokens: usize,
        chunk_overlap: usize,
        counter: &TokenCounter,
        embedder: &dyn Embedder,
    ) -> Self {
        let chunks = chunk_text(corpus, chunk_tokens, chunk_overlap, counter)
            .into_iter()
            .map(|text| {
                let vector = embedder.embed(&text);
                IndexedChunk { text, vector }
            })
            .collect::<Vec<_>>();
        debug!(scope_key, chunks = chunks.len(), "index built");
        Self {
            scope_key: scope_key.to_string(),
            embedder_id: embedder.id().to_string(),
            version: SNAPSHOT_VERSION,
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top-k chunks by cosine similarity against a query vector, most
    /// similar first. Ties keep corpus order.
    pub fn query(&self, query_vector: &[f32], k: usize) -> Vec<&IndexedChunk> {
        let mut scored: Vec<(f32, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (cosine_similarity(query_vector, &c.vector), i))
            .collect();
        scored.sort_by(|(a, ai), (b, bi)| b.total_cmp(a).then(ai.cmp(bi)));
        scored
            .into_iter()
            .take(k)
            .map(|(_, i)| &self.chunks[i])
            .collect()
    }

    /// Directory this scope snapshots into, under `root`.
    pub fn snapshot_dir(root: &Path, scope_key: &str) -> PathBuf {
        root.join(sanitise_scope_key(scope_key))
    }

    /// Write a durable snapshot under `root/<sanitised scope>/`.
    /// The write goes through a temp file so a crash mid-save never leaves
    /// a truncated snapshot behind.
    pub fn save(&self, root: &Path) -> Result<()> {
        let dir = Self::snapshot_dir(root, &self.scope_key);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec(self).map_err(|e| RagError::Snapshot(e.to_string()))?;
        let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
        debug!(scope = %self.scope_key, chunks = self.chunks.len(), "snapshot saved");
        Ok(())
    }

    /// Load a snapshot from one scope directory, verifying version and
    /// embedder identity.
    pub fn load(dir: &Path, expected_embedder: &str) -> Result<Self> {
        let bytes = fs::read(dir.join(SNAPSHOT_FILE))?;
        let index: RagIndex =
            serde_json::from_slice(&bytes).map_err(|e| RagError::Snapshot(e.to_string()))?;
        if index.version != SNAPSHOT_VERSION {
            return Err(RagError::Snapshot(format!(
                "snapshot version {} (want {SNAPSHOT_VERSION})",
                index.version
            )));
        }
        if index.embedder_id != expected_embedder {
            return Err(RagError::Snapshot(format!(
                "snapshot embedder {} (want {expected_embedder})",
                index.embedder_id
            )));
        }
        Ok(index)
    }
}

/// Make a scope key safe as a directory name: path separators and other
/// reserved characters become underscores.
pub fn sanitise_scope_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn counter() -> TokenCounter {
        TokenCounter::for_model("test-model")
    }

    #[test]
    fn query_ranks_by_similarity() {
        let embedder = HashEmbedder::default();
        let corpus = "# A\nthe lobby lighting was warm\n# B\nquarterly fiscal projections\n";
        let index = RagIndex::build("interview", corpus, 1000, 100, &counter(), &embedder);
        assert_eq!(index.len(), 2);

        let q = embedder.embed("warm lobby lighting");
        let top = index.query(&q, 1);
        assert!(top[0].text.contains("lobby"));
    }

    #[test]
    fn snapshot_roundtrip() {
        let embedder = HashEmbedder::default();
        let index = RagIndex::build(
            "interview:methodology",
            "guests liked the breakfast",
            1000,
            100,
            &counter(),
            &embedder,
        );

        let dir = tempfile::tempdir().unwrap();
        index.save(dir.path()).unwrap();

        let scope_dir = RagIndex::snapshot_dir(dir.path(), "interview:methodology");
        let loaded = RagIndex::load(&scope_dir, embedder.id()).unwrap();
        assert_eq!(loaded.scope_key, "interview:methodology");
        assert_eq!(loaded.len(), index.len());
    }

    #[test]
    fn snapshot_rejects_wrong_embedder() {
        let embedder = HashEmbedder::default();
        let index = RagIndex::build("design", "corpus", 1000, 100, &counter(), &embedder);
        let dir = tempfile::tempdir().unwrap();
        index.save(dir.path()).unwrap();

        let scope_dir = RagIndex::snapshot_dir(dir.path(), "design");
        let err = RagIndex::load(&scope_dir, "other-embedder").unwrap_err();
        assert!(matches!(err, RagError::Snapshot(_)));
    }

    #[test]
    fn scope_keys_are_sanitised() {
        assert_eq!(sanitise_scope_key("interview:metho/dology"), "interview_metho_dology");
        assert_eq!(sanitise_scope_key("../../etc"), ".._.._etc");
        assert_eq!(sanitise_scope_key("design"), "design");
    }
}
