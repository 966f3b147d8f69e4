//! Indexer settings
//!
//! Sources, later ones winning:
//! - built-in defaults
//! - `<root>/sett.toml`
//! - `<root>/.env` and the process environment (`SETT_*`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IndexError;

/// Settings file looked up in the workspace root
pub const CONFIG_FILE: &str = "sett.toml";

pub const DEFAULT_EXTENSIONS: &[&str] = &["c", "h", "cpp", "cc", "cxx", "hpp", "hh", "hxx", "py"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettConfig {
    /// Graph namespace; one workspace root is bound to each.
    pub namespace: String,
    /// Where the hash cache, workspace record and graph snapshot live.
    pub state_dir: Option<PathBuf>,
    pub extensions: Vec<String>,
    /// Glob patterns, relative to the root, that are never indexed.
    pub exclude: Vec<String>,
    /// Trailing debounce window for the file watcher.
    pub debounce_ms: u64,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic in-process feature hashing.
    Local,
    /// Any endpoint speaking the OpenAI `/v1/embeddings` protocol.
    OpenAi,
    /// Do not embed; semantic search returns nothing.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SettConfig {
    fn default() -> Self {
        SettConfig {
            namespace: "default".to_string(),
            state_dir: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude: vec!["build/**".to_string(), "**/__pycache__/**".to_string()],
            debounce_ms: 10_000,
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: EmbeddingProvider::Local,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 256,
            api_key: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 7890,
        }
    }
}

impl SettConfig {
    /// Load settings for `root`. A missing settings file is not an error.
    pub fn load(root: &Path) -> Result<Self, IndexError> {
        if dotenvy::from_path(root.join(".env")).is_ok() {
            debug!("Loaded environment from {}", root.join(".env").display());
        }

        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
            Self::from_toml(&content)?
        } else {
            SettConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, IndexError> {
        toml::from_str(content).map_err(|e| IndexError::Config(e.to_string()))
    }

    /// Apply `SETT_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ns) = lookup("SETT_NAMESPACE") {
            self.namespace = ns;
        }
        if let Some(dir) = lookup("SETT_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(ms) = lookup("SETT_DEBOUNCE_MS") {
            match ms.parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => warn!("Ignoring invalid SETT_DEBOUNCE_MS={}", ms),
            }
        }
        if let Some(provider) = lookup("SETT_EMBEDDING_PROVIDER") {
            match provider.to_ascii_lowercase().as_str() {
                "local" => self.embedding.provider = EmbeddingProvider::Local,
                "openai" => self.embedding.provider = EmbeddingProvider::OpenAi,
                "none" => self.embedding.provider = EmbeddingProvider::None,
                other => warn!("Ignoring unknown SETT_EMBEDDING_PROVIDER={}", other),
            }
        }
        if let Some(endpoint) = lookup("SETT_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = endpoint;
        }
        if let Some(model) = lookup("SETT_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(key) = lookup("SETT_EMBEDDING_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.embedding.api_key = Some(key);
        }
        if let Some(host) = lookup("SETT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SETT_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid SETT_PORT={}", port),
            }
        }
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.namespace.is_empty() || self.namespace.contains(['/', '\\']) {
            return Err(IndexError::Config(format!(
                "namespace {:?} must be a non-empty single path segment",
                self.namespace
            )));
        }
        if self.extensions.is_empty() {
            return Err(IndexError::Config("no source extensions configured".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(IndexError::Config("embedding dimensions must be positive".into()));
        }
        Ok(())
    }

    /// `state_dir` if set, else `~/.sett/<namespace>`, else `<root>/.sett/<namespace>`.
    pub fn resolved_state_dir(&self, root: &Path) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| root.to_path_buf())
            .join(".sett")
            .join(&self.namespace)
    }
}
