use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default ASR request window: 3 minutes of audio per call.
pub const DEFAULT_ASR_WINDOW_MS: u64 = 180_000;
/// Default cadence of the RAG snapshot daemon.
pub const DEFAULT_RAG_SAVE_PERIOD_SECS: u64 = 900;
/// Per-stage share of the request deadline when none is configured.
pub const DEADLINE_SECS_PER_STAGE: u64 = 60;

/// Top-level config (voxpersona.toml + VOXPERSONA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// LLM credentials. The pool's size and per-credential budgets.
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rag: RagConfig,
}

impl Default for VoxConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
            credentials: Vec::new(),
            database: DatabaseConfig::default(),
            rag: RagConfig::default(),
        }
    }
}

/// One LLM credential with its own rate budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub id: u32,
    pub secret: String,
    /// Tokens-per-minute budget.
    pub tpm: u32,
    /// Requests-per-minute budget.
    pub rpm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Logical model name passed to the gateway and the tokenizer.
    #[serde(default = "default_report_model")]
    pub report_model: String,
    /// `max_tokens` sent with every provider call.
    #[serde(default = "default_max_answer_tokens")]
    pub max_answer_tokens: u32,
    /// Whole-request deadline in seconds. When unset the planner derives
    /// chain_len * 60 s at plan time.
    pub request_deadline_secs: Option<u64>,
    /// ASR window length in milliseconds.
    #[serde(default = "default_asr_window_ms")]
    pub asr_window_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            report_model: default_report_model(),
            max_answer_tokens: default_max_answer_tokens(),
            request_deadline_secs: None,
            asr_window_ms: default_asr_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Root directory for index snapshots, one subdirectory per scope.
    #[serde(default = "default_rag_index_dir")]
    pub index_dir: String,
    /// Snapshot cadence of the persistence daemon, in seconds.
    #[serde(default = "default_rag_save_period")]
    pub save_period_secs: u64,
    /// Top-k for the single-shot fast search.
    #[serde(default = "default_topk_fast")]
    pub topk_fast: usize,
    /// Candidate set size for the deep-search fan-out.
    #[serde(default = "default_topk_deep")]
    pub topk_deep: usize,
    /// Chunk size in tokens.
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    /// Overlap between adjacent chunks, in tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Bounded concurrency of the deep-search worker pool.
    #[serde(default = "default_deep_workers")]
    pub deep_workers: usize,
    /// Default per-session deep-search flag.
    #[serde(default)]
    pub deep_search: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            index_dir: default_rag_index_dir(),
            save_period_secs: default_rag_save_period(),
            topk_fast: default_topk_fast(),
            topk_deep: default_topk_deep(),
            chunk_tokens: default_chunk_tokens(),
            chunk_overlap: default_chunk_overlap(),
            deep_workers: default_deep_workers(),
            deep_search: false,
        }
    }
}

fn default_report_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_max_answer_tokens() -> u32 {
    4096
}
fn default_asr_window_ms() -> u64 {
    DEFAULT_ASR_WINDOW_MS
}
fn default_db_path() -> String {
    "./voxpersona.db".to_string()
}
fn default_rag_index_dir() -> String {
    "./rag-indices".to_string()
}
fn default_rag_save_period() -> u64 {
    DEFAULT_RAG_SAVE_PERIOD_SECS
}
fn default_topk_fast() -> usize {
    15
}
fn default_topk_deep() -> usize {
    60
}
fn default_chunk_tokens() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_deep_workers() -> usize {
    8
}

impl VoxConfig {
    /// Load config from a TOML file with VOXPERSONA_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("voxpersona.toml");

        let config: VoxConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VOXPERSONA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Deadline for a request over `chain_len` stages, in seconds.
    pub fn request_deadline_secs(&self, chain_len: usize) -> u64 {
        self.analysis
            .request_deadline_secs
            .unwrap_or(chain_len.max(1) as u64 * DEADLINE_SECS_PER_STAGE)
    }
}
