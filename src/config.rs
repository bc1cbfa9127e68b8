//! Configuration loading and management for minuta.
//!
//! Loads settings from `minuta.toml` with environment variable overrides for sensitive data.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing required API key for provider: {0}")]
    MissingApiKey(String),
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// LLM provider: "gemini" or "openai"
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.0-flash")
    pub model: String,
    /// System persona for the agent
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles on every further attempt
    #[serde(default = "default_backoff_secs")]
    pub base_backoff_secs: u64,
}

/// API keys and tokens (loaded from environment)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub gemini_key: Option<String>,
    #[serde(default)]
    pub openai_key: Option<String>,
    /// Bearer token for the drive and document APIs
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Output document settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentsConfig {
    /// Template to clone; no documents are built when unset
    #[serde(default)]
    pub template_doc_id: Option<String>,
    /// Folder finished documents are filed into
    #[serde(default)]
    pub output_folder_id: Option<String>,
    /// Section mapping file; the built-in mapping is used when unset
    #[serde(default)]
    pub mapping: Option<PathBuf>,
    #[serde(default)]
    pub title_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Local,
    Google,
}

/// Where transcripts and summaries live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Root directory for the local backend
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

/// Batch processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Folders scanned for new transcripts
    #[serde(default)]
    pub source_folders: Vec<String>,
    /// Folder receiving the structured JSON summaries
    #[serde(default)]
    pub summary_folder: String,
    /// Name of the archive folder created inside each source folder
    #[serde(default = "default_archive_name")]
    pub archive_name: String,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for data storage
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location (minuta.toml in cwd or home)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::find_config_file();
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override secrets from environment variables
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.api.gemini_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api.openai_key = Some(key);
        }
        if let Ok(token) = std::env::var("MINUTA_ACCESS_TOKEN") {
            self.api.access_token = Some(token);
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> PathBuf {
        // Check current directory first
        let local_config = PathBuf::from("minuta.toml");
        if local_config.exists() {
            return local_config;
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("minuta").join("minuta.toml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default to local path (will error on read)
        local_config
    }

    /// Get the API key for the configured provider
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        match self.agent.provider.as_str() {
            "gemini" => self
                .api
                .gemini_key
                .as_deref()
                .ok_or_else(|| ConfigError::MissingApiKey("gemini".to_string())),
            "openai" => self
                .api
                .openai_key
                .as_deref()
                .ok_or_else(|| ConfigError::MissingApiKey("openai".to_string())),
            other => Err(ConfigError::MissingApiKey(other.to_string())),
        }
    }

    pub fn access_token(&self) -> Result<&str, ConfigError> {
        self.api
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingSetting("api.access_token"))
    }
}

fn default_persona() -> String {
    "You are an executive assistant who writes precise, factual meeting summaries.".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    10
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./transcripts")
}

fn default_workers() -> usize {
    5
}

fn default_archive_name() -> String {
    "transcript_archive".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            root: default_store_root(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            source_folders: Vec::new(),
            summary_folder: String::new(),
            archive_name: default_archive_name(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
