//! TOML configuration parsing and validation.
//!
//! The server reads a single TOML file (default: `config/mindmenu.toml`).
//! Provider secrets are never stored in the file; they are read from the
//! environment (`GEMINI_API_KEY`, `OPENAI_API_KEY`, `PINECONE_API_KEY`)
//! when the corresponding client is constructed.
//!
//! ```toml
//! [db]
//! path = "./data/mindmenu.sqlite"
//!
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [generation]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//!
//! [vector_store]
//! provider = "pinecone"
//! index_name = "mindmenu-index"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts per provider call.
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: Some("text-embedding-004".to_string()),
            dims: Some(768),
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: Some("gemini-2.5-flash".to_string()),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    /// `sqlite` (vectors live next to the relational data), `pinecone`, or `memory`.
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// IDs per fetch and vectors per upsert/delete round-trip.
    #[serde(default = "default_vector_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            index_name: default_index_name(),
            batch_size: default_vector_batch_size(),
            cloud: default_cloud(),
            region: default_region(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Conversation turns rendered into a prompt.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_vector_provider() -> String {
    "sqlite".to_string()
}
fn default_index_name() -> String {
    "mindmenu-index".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_vector_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_top_k() -> usize {
    5
}
fn default_history_limit() -> usize {
    crate::prompt::DEFAULT_HISTORY_TURNS
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.history_limit > crate::prompt::DEFAULT_HISTORY_TURNS {
        anyhow::bail!(
            "retrieval.history_limit must be <= {}",
            crate::prompt::DEFAULT_HISTORY_TURNS
        );
    }
    if config.vector_store.batch_size == 0 {
        anyhow::bail!("vector_store.batch_size must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    if config.embedding.is_enabled() && config.embedding.dims == Some(0) {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, openai, ollama, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, openai, or ollama.",
            other
        ),
    }

    match config.vector_store.provider.as_str() {
        "sqlite" | "pinecone" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector store provider: '{}'. Must be sqlite, pinecone, or memory.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let text = format!(
            r#"
[db]
path = "/tmp/mm.sqlite"

[server]
bind = "127.0.0.1:0"
{}
"#,
            extra
        );
        let config: Config = toml::from_str(&text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse("").unwrap();
        assert_eq!(config.embedding.provider, "gemini");
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.vector_store.batch_size, 100);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.history_limit, 5);
    }

    #[test]
    fn test_unknown_vector_provider_rejected() {
        let err = parse("[vector_store]\nprovider = \"chroma\"").unwrap_err();
        assert!(err.to_string().contains("Unknown vector store provider"));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(parse("[retrieval]\ntop_k = 0").is_err());
    }

    #[test]
    fn test_history_limit_above_five_rejected() {
        let err = parse("[retrieval]\nhistory_limit = 6").unwrap_err();
        assert!(err.to_string().contains("retrieval.history_limit"));
        assert!(parse("[retrieval]\nhistory_limit = 3").is_ok());
    }

    #[test]
    fn test_zero_dims_rejected() {
        let err = parse("[embedding]\nprovider = \"openai\"\ndims = 0").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
