//! TOML configuration parsing and validation.
//!
//! Every section has serde defaults so a minimal file only needs the
//! provider settings. [`load_config`] parses and then validates; any
//! problem that would otherwise surface mid-request (overlap larger than
//! the chunk size, missing embedding dimensions, unknown providers) is
//! rejected here, at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use rag_gateway_core::classify::{DEFAULT_DOMAIN_KEYWORDS, DEFAULT_GREETINGS};
use rag_gateway_core::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ragd.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"sqlite"` (persistent) or `"memory"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}
fn default_store_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            concurrency: default_concurrency(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_concurrency() -> usize {
    4
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            stream_buffer: default_stream_buffer(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_stream_buffer() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_collection")]
    pub default_collection: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_collection: default_collection(),
            top_k: default_top_k(),
            min_relevance: default_min_relevance(),
        }
    }
}

fn default_collection() -> String {
    "academy".to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_min_relevance() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    /// `"keyword"` or `"llm"`.
    #[serde(default = "default_classifier")]
    pub classifier: String,
    #[serde(default = "default_greetings")]
    pub greetings: Vec<String>,
    #[serde(default = "default_domain_keywords")]
    pub domain_keywords: Vec<String>,
    #[serde(default = "default_retrieve")]
    pub default_retrieve: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            classifier: default_classifier(),
            greetings: default_greetings(),
            domain_keywords: default_domain_keywords(),
            default_retrieve: default_retrieve(),
        }
    }
}

fn default_classifier() -> String {
    "keyword".to_string()
}
fn default_greetings() -> Vec<String> {
    DEFAULT_GREETINGS.iter().map(|s| s.to_string()).collect()
}
fn default_domain_keywords() -> Vec<String> {
    DEFAULT_DOMAIN_KEYWORDS.iter().map(|s| s.to_string()).collect()
}
fn default_retrieve() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8091".to_string()
}

/// Read, parse, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<(), RagError> {
    let bad = |msg: String| Err(RagError::Configuration(msg));

    if config.chunking.max_chars == 0 {
        return bad("chunking.max_chars must be > 0".into());
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        return bad(format!(
            "chunking.overlap_chars ({}) must be less than chunking.max_chars ({})",
            config.chunking.overlap_chars, config.chunking.max_chars
        ));
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => return bad(format!("Unknown store backend: '{}'. Must be sqlite or memory.", other)),
    }
    if config.store.timeout_secs == 0 {
        return bad("store.timeout_secs must be > 0".into());
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => {
            return bad(format!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ))
        }
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            return bad(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ));
        }
        if config.embedding.model.is_none() {
            return bad(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            ));
        }
    }
    if config.embedding.batch_size == 0 || config.embedding.concurrency == 0 {
        return bad("embedding.batch_size and embedding.concurrency must be > 0".into());
    }
    if config.embedding.timeout_secs == 0 {
        return bad("embedding.timeout_secs must be > 0".into());
    }

    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => {
            return bad(format!(
                "Unknown generation provider: '{}'. Must be openai or ollama.",
                other
            ))
        }
    }
    if config.generation.timeout_secs == 0 || config.generation.stream_buffer == 0 {
        return bad("generation.timeout_secs and generation.stream_buffer must be > 0".into());
    }

    if config.retrieval.top_k == 0 {
        return bad("retrieval.top_k must be >= 1".into());
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_relevance) {
        return bad("retrieval.min_relevance must be in [0.0, 1.0]".into());
    }

    match config.planner.classifier.as_str() {
        "keyword" | "llm" => {}
        other => {
            return bad(format!(
                "Unknown planner classifier: '{}'. Must be keyword or llm.",
                other
            ))
        }
    }

    Ok(())
}
