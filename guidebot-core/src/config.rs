//! Configuration system for GuideBot.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config -> environment. Configuration is loaded from
//! `~/.config/guidebot/config.toml` and/or `.guidebot/config.toml` in the
//! workspace directory, with `GUIDEBOT_`-prefixed environment variables on top
//! (e.g. `GUIDEBOT_LLM__MODEL`, `GUIDEBOT_EMBEDDING__DIMENSIONS`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub budget: BudgetConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
}

/// Chat-completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier sent to the completions endpoint.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Request timeout in seconds for completion calls.
    pub timeout_secs: u64,
    /// Sampling temperature for answer generation.
    pub temperature: f32,
    /// Sampling temperature for image captioning.
    pub caption_temperature: f32,
    /// Maximum tokens to generate for an image caption.
    pub caption_max_tokens: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 60,
            temperature: 0.1,
            caption_temperature: 0.2,
            caption_max_tokens: 500,
        }
    }
}

impl LlmConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns human-readable warning messages for problematic values; never a
    /// hard error.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every completion call will time out".to_string());
        }
        warnings
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai" (remote API) or "local" (deterministic hash
    /// embedder, for development and tests).
    pub provider: String,
    /// Model identifier sent to the embeddings endpoint.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Embedding dimension; every stored vector must match.
    pub dimensions: usize,
    /// Number of texts per embedding API call.
    pub batch_size: usize,
    /// Request timeout in seconds for batch embedding calls.
    pub timeout_secs: u64,
    /// Request timeout in seconds for single-text embedding calls.
    pub single_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            dimensions: 1536,
            batch_size: 16,
            timeout_secs: 60,
            single_timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.dimensions == 0 {
            warnings.push("embedding.dimensions is 0; no vector can be stored".to_string());
        }
        if self.batch_size == 0 {
            warnings.push("embedding.batch_size is 0; ingest will embed nothing".to_string());
        }
        warnings
    }
}

/// Token budget configuration for prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard maximum input tokens the model accepts.
    pub max_input_tokens: usize,
    /// Tokens reserved for the model's answer.
    pub max_output_tokens: usize,
    /// Safety margin subtracted from the input budget.
    pub buffer_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 128_000,
            max_output_tokens: 16_384,
            buffer_tokens: 500,
        }
    }
}

impl BudgetConfig {
    /// Target token count for the assembled prompt plus query.
    ///
    /// Signed: a misconfigured budget can legitimately go non-positive, and the
    /// assembler has to handle that without ever tokenizing a negative length.
    pub fn target_input_tokens(&self) -> i64 {
        self.max_input_tokens as i64 - self.max_output_tokens as i64 - self.buffer_tokens as i64
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.target_input_tokens() <= 0 {
            warnings.push(format!(
                "budget leaves no room for prompts: {} - {} - {} = {}",
                self.max_input_tokens,
                self.max_output_tokens,
                self.buffer_tokens,
                self.target_input_tokens()
            ));
        }
        warnings
    }
}

/// Retrieval and chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of nearest chunks to retrieve per query.
    pub top_k: usize,
    /// Target chunk size in characters for document splitting.
    pub chunk_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            chunk_size: 500,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.top_k == 0 {
            warnings.push("retrieval.top_k is 0; search will never return context".to_string());
        }
        if self.chunk_size < 50 {
            warnings.push(format!(
                "retrieval.chunk_size ({}) is very small; chunks will carry little meaning",
                self.chunk_size
            ));
        }
        warnings
    }
}

/// Where blobs and the prompt rules live on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the filesystem blob store. Defaults to the platform
    /// data dir (e.g. `~/.local/share/guidebot`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Optional path to a prompt-rules text file; the built-in rules are used
    /// when unset or unreadable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_rules_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the blob store root, falling back to the platform data dir.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "guidebot", "guidebot")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".guidebot/data"))
    }
}

impl AppConfig {
    /// Validate all sections and return the combined warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        warnings.extend(self.llm.validate());
        warnings.extend(self.embedding.validate());
        warnings.extend(self.budget.validate());
        warnings.extend(self.retrieval.validate());
        warnings
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `GUIDEBOT_`)
/// 3. Workspace-local config (`.guidebot/config.toml`)
/// 4. User config (`~/.config/guidebot/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "guidebot", "guidebot") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".guidebot").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (GUIDEBOT_LLM__MODEL, GUIDEBOT_RETRIEVAL__TOP_K, ...)
    figment = figment.merge(Env::prefixed("GUIDEBOT_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
