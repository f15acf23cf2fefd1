use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CoreError, Result};

/// Immutable configuration record assembled once at the composition root.
/// Secrets are pulled from the environment after the TOML parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub orchestrator: OrchestratorConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SSE stream idle timeout, seconds
    pub stream_idle_timeout_secs: u64,
    /// Per-conversation replay buffer capacity
    pub stream_buffer_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            stream_idle_timeout_secs: 900,
            stream_buffer_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Qdrant + Neo4j + Postgres
    External,
    /// In-memory stores, for local runs and tests
    Ephemeral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub qdrant_url: String,
    pub collection: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub postgres_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::External,
            qdrant_url: "http://localhost:6334".to_string(),
            collection: "codemend_chunks".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: String::new(),
            postgres_url: "postgresql://localhost/codemend".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "ollama", "openai" or "hybrid"
    pub provider: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Chat deadline, seconds (large models are slow)
    pub chat_deadline_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "qwen2.5-coder:14b".to_string(),
            openai_url: "https://api.openai.com".to_string(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 8192,
            chat_deadline_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub ollama_url: String,
    pub model: String,
    /// Pinned per deployment; mixed-dimension upserts are rejected
    pub dimension: usize,
    pub deadline_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            deadline_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Main source root, relative to the working copy
    pub source_root: String,
    /// Excluded test roots
    pub test_roots: Vec<String>,
    /// Vector upsert batch cap
    pub upsert_batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            source_root: "src/main/java".to_string(),
            test_roots: vec!["src/test/java".to_string()],
            upsert_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    /// Global context bundle cap
    pub bundle_cap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 20,
            bundle_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Fixed worker pool size
    pub worker_count: usize,
    /// Build/repair attempt budget per conversation
    pub max_build_attempts: u32,
    /// Build command invoked in the working copy, e.g. ["mvn", "-B", "test-compile"]
    pub build_command: Vec<String>,
    pub build_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            max_build_attempts: 3,
            build_command: vec![
                "mvn".to_string(),
                "-B".to_string(),
                "test-compile".to_string(),
            ],
            build_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub username: String,
    pub token: String,
    pub author_name: String,
    pub author_email: String,
    /// Root under which per-conversation working copies are created
    pub workdir_root: PathBuf,
    pub pr_api_base: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            username: "codemend".to_string(),
            token: String::new(),
            author_name: "codemend".to_string(),
            author_email: "codemend@localhost".to_string(),
            workdir_root: PathBuf::from("/tmp/codemend/workspaces"),
            pr_api_base: "https://api.github.com".to_string(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SystemConfig =
            toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Secrets always win from the environment over the TOML file
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("CODEMEND_GIT_TOKEN") {
            self.git.token = token;
        }
        if let Ok(key) = std::env::var("CODEMEND_OPENAI_API_KEY") {
            self.llm.openai_api_key = key;
        }
        if let Ok(password) = std::env::var("CODEMEND_NEO4J_PASSWORD") {
            self.storage.neo4j_password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1024, 1536];
        if !SUPPORTED_DIMENSIONS.contains(&self.embedding.dimension) {
            return Err(CoreError::Config(format!(
                "unsupported embedding dimension {} (expected one of {:?})",
                self.embedding.dimension, SUPPORTED_DIMENSIONS
            )));
        }
        if self.orchestrator.worker_count == 0 {
            return Err(CoreError::Config("worker_count must be positive".into()));
        }
        if self.orchestrator.build_command.is_empty() {
            return Err(CoreError::Config("build_command must not be empty".into()));
        }
        Ok(())
    }
}
