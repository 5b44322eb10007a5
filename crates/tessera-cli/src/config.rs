//! Configuration and path resolution for the CLI.
//!
//! Settings are layered with figment, later layers winning:
//! 1. Built-in defaults
//! 2. `tessera.toml` in the data directory
//! 3. `TESSERA_*` environment variables (`__` separates nested keys, e.g.
//!    `TESSERA_RETRIEVAL__TOP_K=5`)

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_core::config::RetrievalSettings;
use tessera_core::generation::ModelConfig;

/// Config file looked up inside the data directory
const CONFIG_FILENAME: &str = "tessera.toml";

/// Chunk store database
const CHUNKS_FILENAME: &str = "chunks.redb";

/// Persisted vector index
const VECTORS_FILENAME: &str = "vectors.redb";

const ENV_PREFIX: &str = "TESSERA_";

/// Everything the binary needs to build an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Base URL of the Ollama-compatible API
    pub ollama_url: String,
    pub chat_model: String,
    pub embed_model: String,
    /// Output width of `embed_model`
    pub embedding_dim: usize,
    /// Upper bound on generated tokens
    pub num_predict: u32,
    /// HTTP timeout for embedding calls
    pub embed_timeout_secs: u64,
    pub retrieval: RetrievalSettings,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            chat_model: "gemma3:1b".to_string(),
            embed_model: "mxbai-embed-large".to_string(),
            embedding_dim: 1024,
            num_predict: 512,
            embed_timeout_secs: 30,
            retrieval: RetrievalSettings::default(),
        }
    }
}

impl CliConfig {
    /// Loads the layered configuration for `data_dir`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::figment(data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {}", data_dir.display()))
    }

    fn figment(data_dir: &Path) -> Figment {
        Figment::from(Serialized::defaults(CliConfig::default()))
            .merge(Toml::file(data_dir.join(CONFIG_FILENAME)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn model(&self) -> ModelConfig {
        ModelConfig {
            chat_model: self.chat_model.clone(),
            embed_model: self.embed_model.clone(),
            embedding_dim: self.embedding_dim,
        }
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }
}

/// Returns the data directory.
///
/// - macOS: `~/Library/Application Support/dev.tessera.Tessera/`
/// - Linux: `~/.local/share/tessera/`
/// - Windows: `%APPDATA%\tessera\Tessera\data\`
pub fn get_data_dir(custom_dir: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = custom_dir {
        return Ok(dir.clone());
    }

    ProjectDirs::from("dev", "tessera", "Tessera")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine data directory"))
}

pub fn chunks_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CHUNKS_FILENAME)
}

pub fn vectors_path(data_dir: &Path) -> PathBuf {
    data_dir.join(VECTORS_FILENAME)
}
