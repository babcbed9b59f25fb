//! Configuration management for Folio
//!
//! Configuration lives in a single TOML file. Values can be overridden per
//! process with `FOLIO_SECTION__KEY` environment variables and per invocation
//! with named profiles.

use crate::error::{FolioError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the persisted active-document snapshot
    pub data_dir: PathBuf,
}

/// Daemon configuration for the socket server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" (local model) or "http" (OpenAI-compatible endpoint)
    pub provider: String,
    pub model: String,
    /// Base URL for the http provider
    #[serde(default)]
    pub endpoint: String,
    /// Environment variable holding the http provider's API key
    #[serde(default)]
    pub api_key_env: String,
    pub batch_size: usize,
    /// Pause between ingestion batches, for rate-limited providers
    #[serde(default)]
    pub batch_pause_ms: u64,
    pub retry: RetryConfig,
}

/// Exponential backoff settings for embedding calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages returned per tool call
    pub k: usize,
    /// Weight of the semantic list; the lexical list gets `1 - vector_weight`
    pub vector_weight: f32,
    /// Reciprocal Rank Fusion constant
    pub rrf_k: f32,
    /// "full" or "prefix"
    pub fingerprint: String,
    /// Characters hashed when `fingerprint = "prefix"`
    pub prefix_len: usize,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub idle_timeout_secs: u64,
}

/// Generation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum ASK_MODEL -> AWAIT_TOOL transitions per request
    pub max_cycles: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FolioError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FolioError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| FolioError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(weight) = overrides.vector_weight {
            self.retrieval.vector_weight = weight;
        }
        if let Some(max_cycles) = overrides.max_cycles {
            self.agent.max_cycles = max_cycles;
        }

        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: FOLIO_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("FOLIO_") {
                if let Err(e) = self.set_value(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    /// Set a single value from a `SECTION__KEY` path
    pub fn set_value(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__BASE_URL" => self.llm.base_url = value.to_string(),
            "LLM__TEMPERATURE" => self.llm.temperature = parse_value(path, value)?,
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__ENDPOINT" => self.embedding.endpoint = value.to_string(),
            "RETRIEVAL__K" => self.retrieval.k = parse_value(path, value)?,
            "RETRIEVAL__VECTOR_WEIGHT" => self.retrieval.vector_weight = parse_value(path, value)?,
            "AGENT__MAX_CYCLES" => self.agent.max_cycles = parse_value(path, value)?,
            "DAEMON__SOCKET_PATH" => self.daemon.socket_path = PathBuf::from(value),
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| FolioError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("folio").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| FolioError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.folio");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
            },
            daemon: DaemonConfig {
                socket_path: data_dir.join("folio.sock"),
                max_connections: 16,
            },
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                endpoint: String::new(),
                api_key_env: String::new(),
                batch_size: 10,
                batch_pause_ms: 0,
                retry: RetryConfig {
                    max_attempts: 5,
                    initial_delay_ms: 4_000,
                    max_delay_ms: 60_000,
                    multiplier: 2.0,
                },
            },
            retrieval: RetrievalConfig {
                k: 6,
                vector_weight: 0.5,
                rrf_k: 60.0,
                fingerprint: "full".to_string(),
                prefix_len: 200,
            },
            llm: LlmConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                api_key_env: "GROQ_API_KEY".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                temperature: 0.0,
                idle_timeout_secs: 600,
            },
            agent: AgentConfig { max_cycles: 5 },
            profiles: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert_eq!(config.retrieval.k, 6);
        assert_eq!(config.retrieval.vector_weight, 0.5);
        assert_eq!(config.embedding.retry.max_attempts, 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.llm.model = "llama-3.3-70b-versatile".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(loaded.agent.max_cycles, 5);
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::load(Path::new("/nonexistent/folio/config.toml"));
        assert!(matches!(result, Err(FolioError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "keyword".to_string(),
            ProfileOverrides {
                vector_weight: Some(0.2),
                llm_model: Some("llama-3.3-70b-versatile".to_string()),
                ..Default::default()
            },
        );

        config.apply_profile("keyword").unwrap();
        assert_eq!(config.retrieval.vector_weight, 0.2);
        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");

        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_set_value() {
        let mut config = Config::default();
        config.set_value("RETRIEVAL__K", "4").unwrap();
        config.set_value("AGENT__MAX_CYCLES", "3").unwrap();
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.agent.max_cycles, 3);

        assert!(config.set_value("RETRIEVAL__K", "many").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/.folio")), home.join(".folio"));
        assert_eq!(
            expand_tilde(Path::new("/tmp/folio")),
            PathBuf::from("/tmp/folio")
        );
    }
}
