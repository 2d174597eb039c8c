//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! [`load_config`] parses and validates; invalid values are rejected with
//! a message naming the offending key.
//!
//! ```toml
//! [db]
//! path = "./data/repochat.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [projects.backend]
//! root = "../backend"
//! include_globs = ["**/*.rs", "**/*.toml"]
//! ```

use anyhow::{bail, Context, Result};
use repo_chat_core::chat::{ChatSettings, DEFAULT_SYSTEM_PROMPT};
use repo_chat_core::chunk::ChunkingParams;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// The vector index lives in its own SQLite file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct VectorConfig {
    /// Defaults to `vectors.sqlite` next to the metadata database.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_whole_file_max_lines")]
    pub whole_file_max_lines: u32,
    #[serde(default = "default_segment_lines")]
    pub segment_lines: u32,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: u32,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            whole_file_max_lines: default_whole_file_max_lines(),
            segment_lines: default_segment_lines(),
            overlap_lines: default_overlap_lines(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_whole_file_max_lines() -> u32 {
    120
}
fn default_segment_lines() -> u32 {
    60
}
fn default_overlap_lines() -> u32 {
    8
}
fn default_max_file_bytes() -> usize {
    1024 * 1024
}

impl ChunkingConfig {
    pub fn to_params(&self) -> ChunkingParams {
        ChunkingParams {
            whole_file_max_lines: self.whole_file_max_lines,
            segment_lines: self.segment_lines,
            overlap_lines: self.overlap_lines,
            max_file_bytes: self.max_file_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. OpenAI defaults to `https://api.openai.com`, Ollama to
    /// `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_batch_chars")]
    pub max_batch_chars: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_batch_chars: default_max_batch_chars(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            retry_base_ms: default_retry_base_ms(),
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
fn default_batch_size() -> usize {
    64
}
fn default_max_batch_chars() -> usize {
    120_000
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
            retry_base_ms: default_retry_base_ms(),
            temperature: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_min_score() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            history_messages: default_history_messages(),
            system_prompt: None,
        }
    }
}

fn default_max_context_chars() -> usize {
    12_000
}
fn default_history_messages() -> usize {
    6
}

/// One indexed repository checkout.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_exclude_globs() -> Vec<String> {
    [".git/**", "target/**", "node_modules/**", "**/*.lock"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn vector_path(&self) -> PathBuf {
        match &self.vector.path {
            Some(p) => p.clone(),
            None => self.db.path.with_file_name("vectors.sqlite"),
        }
    }

    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.projects.get(id).ok_or_else(|| {
            anyhow::Error::from(repo_chat_core::RepoChatError::not_found("project", id))
        })
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
            max_context_chars: self.chat.max_context_chars,
            history_messages: self.chat.history_messages,
            system_prompt: self
                .chat
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: self.generation.temperature,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Chunking
    config
        .chunking
        .to_params()
        .validate()
        .context("invalid [chunking] section")?;

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
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
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_batch_chars == 0 {
        bail!("embedding.max_batch_chars must be > 0");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be > 0");
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    // Chat
    if config.chat.max_context_chars == 0 {
        bail!("chat.max_context_chars must be > 0");
    }

    // Projects
    for (id, project) in &config.projects {
        if id.trim().is_empty() {
            bail!("project ids must not be empty");
        }
        if project.include_globs.is_empty() {
            bail!("projects.{}.include_globs must not be empty", id);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/meta.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.whole_file_max_lines, 120);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.embedding.concurrency, 4);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.chat.history_messages, 6);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.vector_path(), PathBuf::from("./data/vectors.sqlite"));
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        let err = parse_config("[db]\npath = \"x.db\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[db]\npath = \"x.db\"\n[generation]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn test_bad_chunking_rejected() {
        let err = parse_config(
            "[db]\npath = \"x.db\"\n[chunking]\nsegment_lines = 4\noverlap_lines = 4\n",
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("overlap_lines"));
    }

    #[test]
    fn test_projects_and_chat_settings() {
        let config = parse_config(
            r#"
            [db]
            path = "x.db"

            [retrieval]
            top_k = 3
            min_score = 0.1

            [chat]
            system_prompt = "be brief"

            [projects.api]
            root = "/srv/api"
            include_globs = ["**/*.rs"]
            "#,
        )
        .unwrap();
        let project = config.project("api").unwrap();
        assert_eq!(project.root, PathBuf::from("/srv/api"));
        assert!(project.exclude_globs.contains(&".git/**".to_string()));
        assert!(config.project("nope").is_err());

        let settings = config.chat_settings();
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.system_prompt, "be brief");
    }
}
