//! Configuration parsing and validation.
//!
//! Campus Assistant is configured via a TOML file (default:
//! `config/kic.toml`). Every section except `[store]` and `[llm]` may be
//! omitted and falls back to its defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "./data/kic.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! model = "gpt-4o-mini"
//! profile = "large"
//!
//! [retrieval]
//! top_k = 20
//! fusion = "weighted"
//! dense_weight = 0.5
//!
//! [rerank]
//! top_n = 5
//!
//! [history]
//! max_turns = 10
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```
//!
//! Secrets are never read from the file: `LLM_API_KEY` (falling back to
//! `OPENAI_API_KEY`) for the chat model, `OPENAI_API_KEY` for OpenAI
//! embeddings, `QDRANT_API_KEY` for Qdrant, and `KIC_API_KEYS` (named by
//! `[server].api_keys_env`) for the keys clients must send to the HTTP API.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use campus_assistant_core::citation::LinkStyle;
use campus_assistant_core::fusion::FusionMethod;
use campus_assistant_core::sparse::DEFAULT_VOCAB_SIZE;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ [store] ============

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite` or `qdrant`.
    pub backend: String,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Qdrant base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    /// Payload value of `source` that marks CMS pages in Qdrant.
    #[serde(default = "default_cms_source")]
    pub cms_source: String,
    #[serde(default = "default_dense_vector")]
    pub dense_vector: String,
    #[serde(default = "default_sparse_vector")]
    pub sparse_vector: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_cms_source() -> String {
    "Drupal".to_string()
}
fn default_dense_vector() -> String {
    "dense".to_string()
}
fn default_sparse_vector() -> String {
    "sparse".to_string()
}

// ============ [embedding] ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_concurrency() -> usize {
    8
}

// ============ [llm] ============

/// How much source text the answer model can take.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextProfile {
    /// Short instructions, capped sources.
    Small,
    /// Full instructions and full source texts.
    #[default]
    Large,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub profile: ContextProfile,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(1),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

// ============ [retrieval] ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    #[default]
    Weighted,
    Rrf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates kept after fusion (K).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Each modality is asked for `candidate_multiplier × top_k` hits.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default)]
    pub fusion: FusionKind,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_vocab_size")]
    pub vocab_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            fusion: FusionKind::default(),
            dense_weight: default_dense_weight(),
            rrf_k: default_rrf_k(),
            vocab_size: default_vocab_size(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetrievalConfig {
    pub fn fusion_method(&self) -> FusionMethod {
        match self.fusion {
            FusionKind::Weighted => FusionMethod::Weighted {
                dense_weight: self.dense_weight,
            },
            FusionKind::Rrf => FusionMethod::ReciprocalRank { k: self.rrf_k },
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_dense_weight() -> f64 {
    0.5
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_vocab_size() -> u32 {
    DEFAULT_VOCAB_SIZE
}

// ============ [rerank] ============

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_max_chars_per_candidate")]
    pub max_chars_per_candidate: usize,
    #[serde(default = "default_rerank_retries")]
    pub max_retries: u32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: default_top_n(),
            max_chars_per_candidate: default_max_chars_per_candidate(),
            max_retries: default_rerank_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_top_n() -> usize {
    5
}
fn default_max_chars_per_candidate() -> usize {
    1500
}
fn default_rerank_retries() -> u32 {
    1
}

// ============ [answer] ============

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// Per-source cap for the `small` profile.
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,
    /// Total source budget for the `small` profile.
    #[serde(default = "default_max_sources_chars")]
    pub max_sources_chars: usize,
    #[serde(default)]
    pub citation_style: LinkStyle,
    /// Shown after repeated not-understood inputs outside a course.
    #[serde(default = "default_support_email")]
    pub support_email: String,
    /// Course page link shown after repeated not-understood inputs in a course.
    #[serde(default = "default_course_url_template")]
    pub course_url_template: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_source_chars: default_max_source_chars(),
            max_sources_chars: default_max_sources_chars(),
            citation_style: LinkStyle::default(),
            support_email: default_support_email(),
            course_url_template: default_course_url_template(),
        }
    }
}

fn default_max_source_chars() -> usize {
    2000
}
fn default_max_sources_chars() -> usize {
    8000
}
fn default_support_email() -> String {
    "support@ki-campus.org".to_string()
}
fn default_course_url_template() -> String {
    "https://moodle.ki-campus.org/course/view.php?id={course_id}".to_string()
}

// ============ [history], [prompts], [server] ============

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Sessions kept in memory at once.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions not used for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl HistoryConfig {
    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

fn default_max_turns() -> usize {
    10
}
fn default_max_sessions() -> usize {
    10_000
}
fn default_session_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    /// Directory with `*.txt` overrides of the built-in prompts.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Environment variable holding the comma-separated API keys accepted
    /// on `/api/*`. Unset or empty leaves the API open.
    #[serde(default = "default_api_keys_env")]
    pub api_keys_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys_env: default_api_keys_env(),
        }
    }
}

impl ServerConfig {
    /// Reads the accepted API keys from `api_keys_env`.
    pub fn api_keys(&self) -> Vec<String> {
        std::env::var(&self.api_keys_env)
            .map(|v| parse_api_keys(&v))
            .unwrap_or_default()
    }
}

fn parse_api_keys(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_api_keys_env() -> String {
    "KIC_API_KEYS".to_string()
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.store.backend.as_str() {
        "sqlite" => {
            if config.store.path.is_none() {
                bail!("store.path must be set when backend is 'sqlite'");
            }
        }
        "qdrant" => {
            if config.store.url.is_none() || config.store.collection.is_none() {
                bail!("store.url and store.collection must be set when backend is 'qdrant'");
            }
        }
        other => bail!(
            "Unknown store backend: '{}'. Must be sqlite or qdrant.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_multiplier < 1 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.dense_weight) {
        bail!("retrieval.dense_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.rrf_k <= 0.0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    if config.retrieval.vocab_size == 0 {
        bail!("retrieval.vocab_size must be > 0");
    }

    if config.rerank.top_n < 1 {
        bail!("rerank.top_n must be >= 1");
    }
    if config.history.max_turns < 1 {
        bail!("history.max_turns must be >= 1");
    }
    if config.history.max_sessions < 1 {
        bail!("history.max_sessions must be >= 1");
    }
    if config.history.session_idle_secs < 1 {
        bail!("history.session_idle_secs must be >= 1");
    }
    if !config.answer.course_url_template.contains("{course_id}") {
        bail!("answer.course_url_template must contain {{course_id}}");
    }

    Ok(config)
}
