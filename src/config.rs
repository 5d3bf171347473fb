use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::PairFormat;
use crate::error::{RefineError, Result};

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_key_file() -> String {
    "key".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_intermediate_format() -> String {
    "json".to_string()
}

fn default_chunk_token_soft_limit() -> usize {
    6_000
}

fn default_memory_token_limit() -> usize {
    2_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub refine: RefineConfig,
    pub main_model: ModelConfig,
    pub terminology_model: ModelConfig,
    pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// File containing the API key, one line
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum attempts for transient failures (timeout, 5xx)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    /// Intermediate representation: json, xml-pair, or pseudo-toml
    #[serde(default = "default_intermediate_format")]
    pub intermediate_format: String,
    /// Fixed pairs per chunk; overrides token-based chunking when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs_per_chunk: Option<usize>,
    /// Soft input-token limit per request for token-based chunking
    #[serde(default = "default_chunk_token_soft_limit")]
    pub chunk_token_soft_limit: usize,
    /// Learned-glossary budget; exceeding it triggers compression
    #[serde(default = "default_memory_token_limit")]
    pub memory_token_limit: usize,
    /// Optional TOML file with authoritative `[[terms]]` mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_glossary_file: Option<PathBuf>,
    /// Write the output file after every chunk instead of once at the end
    #[serde(default = "default_true")]
    pub incremental_output: bool,
    /// Use the streaming API
    #[serde(default)]
    pub use_streaming: bool,
    /// Stop after this many chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chunks: Option<usize>,
    /// Process only the first 10 pairs
    #[serde(default)]
    pub dry_run: bool,
}

/// Per-model settings. Optional fields fall back to the global `[api]`
/// section; a missing value on both sides is a configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub max_output_tokens: u32,
    /// Reasoning effort hint, only forwarded to gpt-5 family models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Model-specific endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model-specific API key file override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price per 1k prompt tokens, in USD
    #[serde(default)]
    pub prompt_per_1k: f64,
    /// Price per 1k completion tokens, in USD
    #[serde(default)]
    pub completion_per_1k: f64,
}

/// API key and endpoint for one model after override resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: default_base_url(),
                key_file: default_key_file(),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
            },
            refine: RefineConfig {
                intermediate_format: default_intermediate_format(),
                pairs_per_chunk: None,
                chunk_token_soft_limit: default_chunk_token_soft_limit(),
                memory_token_limit: default_memory_token_limit(),
                user_glossary_file: None,
                incremental_output: true,
                use_streaming: false,
                max_chunks: None,
                dry_run: false,
            },
            main_model: ModelConfig {
                name: "gpt-5-mini".to_string(),
                max_output_tokens: 12_000,
                reasoning_effort: Some("low".to_string()),
                temperature: None,
                base_url: None,
                key_file: None,
            },
            terminology_model: ModelConfig {
                name: "gpt-4o-mini".to_string(),
                max_output_tokens: 1_800,
                reasoning_effort: None,
                temperature: Some(0.5),
                base_url: None,
                key_file: None,
            },
            pricing: PricingConfig {
                prompt_per_1k: 0.00025,
                completion_per_1k: 0.002,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RefineError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| RefineError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RefineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RefineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Resolve the configured intermediate format. Unknown names are a
    /// configuration-time fatal error, before any chunk is processed.
    pub fn format(&self) -> Result<PairFormat> {
        PairFormat::from_name(&self.refine.intermediate_format)
    }
}

/// Resolve API key and base URL for one model.
///
/// Precedence: model-specific value, else the global `[api]` value, else
/// a configuration error. The key file is read here so a bad path fails
/// before any request goes out.
pub fn resolve_credentials(api: &ApiConfig, model: &ModelConfig) -> Result<ResolvedCredentials> {
    let base_url = model
        .base_url
        .clone()
        .unwrap_or_else(|| api.base_url.clone());
    if base_url.is_empty() {
        return Err(RefineError::Config(format!(
            "No base URL configured for model '{}'",
            model.name
        )));
    }

    let key_path: PathBuf = match &model.key_file {
        Some(path) => path.clone(),
        None => {
            if api.key_file.is_empty() {
                return Err(RefineError::Config(format!(
                    "No API key file configured for model '{}'",
                    model.name
                )));
            }
            PathBuf::from(&api.key_file)
        }
    };

    let api_key = load_api_key(&key_path)?;

    Ok(ResolvedCredentials { api_key, base_url })
}

/// Read an API key file, taking the first non-empty line.
pub fn load_api_key(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RefineError::Config(format!(
            "Failed to read API key file {}: {}",
            path.display(),
            e
        ))
    })?;

    let key = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string();

    if key.is_empty() {
        return Err(RefineError::Config(format!(
            "API key file {} is empty",
            path.display()
        )));
    }

    Ok(key)
}
