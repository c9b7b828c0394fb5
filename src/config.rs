//! Configuration management for RagBuddy
//!
//! Provides TOML-based configuration with defaults, validation and
//! environment overrides for endpoints and credentials.
//! Location: ~/.ragbuddy/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{RagError, Result};
use crate::ingest::ChunkerConfig;
use crate::memory::conversation::MemoryConfig;
use crate::memory::embedding::EmbeddingConfig;
use crate::rag::pipeline::RetrievalConfig;
use crate::rag::prompt::PromptConfig;
use crate::rag::reranking::RerankConfig;
use crate::streaming::GeneratorConfig;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "RAGBUDDY_";

/// Complete configuration for RagBuddy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub chunking: ChunkerConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankConfig,
    pub generator: GeneratorConfig,
    pub memory: MemoryConfig,
    pub prompt: PromptConfig,
}

/// Persisted index location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Snapshot directory
    pub path: String,
    /// Save after every ingestion
    pub auto_save: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: "~/.ragbuddy/law_index".to_string(),
            auto_save: true,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults, then apply env overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(config_path) => Self::load_from_file(&config_path)?,
            None => Self::load_default()?,
        };
        config.apply_env_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| RagError::Configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Standard config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ragbuddy").join("config.toml"))
    }

    /// Apply `RAGBUDDY_*` overrides through the given lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(v) = var("INDEX_PATH") {
            self.index.path = v;
        }
        if let Some(v) = var("EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = var("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = var("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = var("EMBEDDING_DIMENSION").and_then(|v| v.parse().ok()) {
            self.embedding.dimension = v;
        }
        if let Some(v) = var("RERANKER_BASE_URL") {
            self.reranker.base_url = v;
        }
        if let Some(v) = var("RERANKER_MODEL") {
            self.reranker.model = v;
        }
        if let Some(v) = var("RERANKER_API_KEY") {
            self.reranker.api_key = Some(v);
        }
        if let Some(v) = var("GENERATOR_BASE_URL") {
            self.generator.base_url = v;
        }
        if let Some(v) = var("GENERATOR_MODEL") {
            self.generator.model = v;
        }
        if let Some(v) = var("GENERATOR_API_KEY") {
            self.generator.api_key = Some(v);
        }
        if let Some(v) = var("MAX_HISTORY_TURNS").and_then(|v| v.parse().ok()) {
            self.memory.max_turns = v;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.chunking.overlap == 0 || self.chunking.overlap >= self.chunking.chunk_size {
            return Err(RagError::Configuration(format!(
                "overlap must be in 1..{} (got {})",
                self.chunking.chunk_size, self.chunking.overlap
            )));
        }

        if self.embedding.dimension == 0 {
            return Err(RagError::Configuration(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(RagError::Configuration(
                "embedding batch_size must be greater than 0".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 || self.retrieval.candidate_pool < self.retrieval.top_k {
            return Err(RagError::Configuration(format!(
                "candidate_pool ({}) must be >= top_k ({}) and top_k > 0",
                self.retrieval.candidate_pool, self.retrieval.top_k
            )));
        }

        if self.reranker.timeout_secs == 0 {
            return Err(RagError::Configuration(
                "reranker timeout must be bounded and greater than 0".to_string(),
            ));
        }

        if self.memory.max_turns == 0 {
            return Err(RagError::Configuration(
                "max_turns must be greater than 0".to_string(),
            ));
        }

        if self.generator.timeout_secs == 0 || self.generator.stream_idle_secs == 0 {
            return Err(RagError::Configuration(
                "generator timeout_secs and stream_idle_secs must be greater than 0".to_string(),
            ));
        }

        if self.generator.stream_buffer == 0 {
            return Err(RagError::Configuration(
                "stream_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RagError::Configuration(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Write built-in defaults to `path` unless a file is already there
    ///
    /// Environment overrides are never written, so credentials supplied
    /// through `RAGBUDDY_*` variables stay out of the file. Returns whether a
    /// file was created.
    pub fn init_file(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Config::default().save(path)?;
        Ok(true)
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |key: &Option<String>| key.as_ref().map(|_| "********".to_string());
        let mut copy = self.clone();
        copy.embedding.api_key = mask(&self.embedding.api_key);
        copy.reranker.api_key = mask(&self.reranker.api_key);
        copy.generator.api_key = mask(&self.generator.api_key);
        copy
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Resolved snapshot directory
    pub fn index_path(&self) -> PathBuf {
        Self::expand_path(&self.index.path)
    }
}
