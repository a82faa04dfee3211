use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::{Path, PathBuf}};
use tracing::{debug, error, trace};

use crate::llm::ProviderConfig;

mod kg;

pub use kg::*;

/// Model used when a session does not name one
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Session lifetime after its last refresh, in milliseconds (3 days)
pub const MAX_AGE: i64 = 3 * 24 * 3600 * 1000;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_KG_HOST: &str = "KGHOST";
pub const ENV_KG_PORT: &str = "KGPORT";
pub const ENV_KG_DB: &str = "KGDB";

pub const LOCALHOST: &str = "localhost";
pub const DEFAULT_KG_PORT: &str = "7687";
pub const NEO4J_DEFAULT_DB: &str = "neo4j";
pub const NEO4J_DEFAULT_USER: &str = "neo4j";
pub const NEO4J_DEFAULT_PASSWORD: &str = "neo4j";

/// Rows returned by a knowledge-graph lookup unless the request says otherwise
pub const RESULT_NUM_DEFAULT: usize = 3;

pub const PROMPTS_FILE: &str = "prompts.yaml";

/// Instruction placed ahead of knowledge-graph results injected into a chat
pub const KG_RAG_PROMPT: &str = "The following results were retrieved from a knowledge graph \
and may be relevant to the user's question. Use them to inform your answer. If they do not \
contain the information needed, say so rather than guessing.";

/// Serialises tests that change process environment variables
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read the OpenAI API key from the environment.
pub fn get_api_key() -> Option<String> {
    let key = std::env::var(ENV_OPENAI_API_KEY).ok().filter(|k| !k.is_empty());
    trace!("Imported key starting with: {}", key_prefix(key.as_deref()));
    key
}

/// First ten characters of a secret, for logging.
pub fn key_prefix(key: Option<&str>) -> String {
    match key {
        Some(key) => key.chars().take(10).collect(),
        None => "None".to_string(),
    }
}

/// Prompts to hand to the knowledge-graph retrieval agent
pub fn get_rag_agent_prompts(prompt: Option<&str>) -> Vec<String> {
    match prompt {
        Some(prompt) => vec![prompt.to_string()],
        None => vec![KG_RAG_PROMPT.to_string()],
    }
}

/// Prompt collection loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptSet {
    #[serde(default)]
    pub rag_agent_prompts: Vec<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_yaml::Value>,
}

/// Load prompts from a YAML file, logging and returning `None` on any failure.
pub fn load_prompts(file_path: &Path) -> Option<PromptSet> {
    debug!("Importing prompts from: {}", file_path.display());
    let loaded = std::fs::read_to_string(file_path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_yaml::from_str::<PromptSet>(&content).map_err(Into::into));

    match loaded {
        Ok(prompts) => {
            debug!("Prompts imported: {:?}", prompts);
            Some(prompts)
        }
        Err(e) => {
            error!("Failed to import prompts from {}: {}", file_path.display(), e);
            None
        }
    }
}

/// Per-session model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(default = "default_model_name", alias = "model_name")]
    pub model_name: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "top_p")]
    pub top_p: Option<f32>,
}

fn default_model_name() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }
}

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AI provider type
    pub provider: String,

    /// API key
    pub api_key: Option<String>,

    /// Base URL for the API
    pub base_url: Option<String>,

    /// Model to use
    pub model: String,

    /// Maximum tokens for responses
    pub max_tokens: Option<u32>,

    /// Temperature for sampling
    pub temperature: Option<f32>,

    /// Top-p for nucleus sampling
    pub top_p: Option<f32>,

    /// YAML file holding prompts
    pub prompts_file: PathBuf,

    /// Session lifetime in milliseconds
    pub max_age_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            prompts_file: PathBuf::from(PROMPTS_FILE),
            max_age_ms: MAX_AGE,
        }
    }
}

impl Config {
    /// Initialize configuration from various sources
    pub async fn init() -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = Self::default();

        config.load_from_env();

        if let Some(file_config) = Self::load_from_file().await? {
            config.merge_with(file_config);
        }

        config.finalize(std::env::var("OLLAMA_HOST").ok());

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(&mut self) {
        if let Ok(provider) = std::env::var("KGCHAT_PROVIDER") {
            self.provider = provider;
        }

        if self.provider == "openai" && self.api_key.is_none() {
            self.api_key = get_api_key();
        }

        if let Ok(base_url) = std::env::var("KGCHAT_BASE_URL") {
            self.base_url = Some(base_url);
        }

        if let Ok(model) = std::env::var("KGCHAT_MODEL") {
            self.model = model;
        }

        if let Ok(max_tokens_str) = std::env::var("KGCHAT_MAX_TOKENS") {
            if let Ok(max_tokens) = max_tokens_str.parse() {
                self.max_tokens = Some(max_tokens);
            }
        }

        if let Ok(temp_str) = std::env::var("KGCHAT_TEMPERATURE") {
            if let Ok(temperature) = temp_str.parse() {
                self.temperature = Some(temperature);
            }
        }

        if let Ok(prompts_file) = std::env::var("KGCHAT_PROMPTS_FILE") {
            self.prompts_file = PathBuf::from(prompts_file);
        }
    }

    /// Fill in provider-dependent settings once every source has been merged.
    /// Ollama needs no API key, but sessions only start a chatter when one is set.
    pub fn finalize(&mut self, ollama_host: Option<String>) {
        if self.provider != "ollama" {
            return;
        }
        if self.base_url.is_none() {
            self.base_url = ollama_host;
        }
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            self.api_key = Some("not-required".to_string());
        }
    }

    /// Candidate config files, highest priority first
    fn config_paths() -> Vec<PathBuf> {
        let mut config_paths = vec![
            PathBuf::from("./kgchat.yaml"),
            PathBuf::from("./kgchat.yml"),
            PathBuf::from("./kgchat.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("kgchat").join("kgchat.yaml"));
            config_paths.push(config_dir.join("kgchat").join("kgchat.json"));
        }

        config_paths
    }

    /// Load the first configuration file found, if any
    pub async fn load_from_file() -> Result<Option<Self>> {
        for path in Self::config_paths() {
            if path.exists() {
                return Self::load_from_path(&path).await.map(Some);
            }
        }
        Ok(None)
    }

    /// Load configuration from a YAML or JSON file
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Merge another configuration into this one
    pub fn merge_with(&mut self, other: Self) {
        let defaults = Self::default();
        if other.provider != defaults.provider {
            self.provider = other.provider;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if !other.model.is_empty() && other.model != defaults.model {
            self.model = other.model;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.top_p.is_some() {
            self.top_p = other.top_p;
        }
        if other.prompts_file != defaults.prompts_file {
            self.prompts_file = other.prompts_file;
        }
        if other.max_age_ms != defaults.max_age_ms {
            self.max_age_ms = other.max_age_ms;
        }
    }

    /// Check if the configuration has a valid API key
    pub fn has_api_key(&self) -> bool {
        if self.provider == "ollama" {
            return true;
        }
        self.api_key.as_deref().map_or(false, |key| !key.is_empty())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.has_api_key() {
            return Err(anyhow::anyhow!(
                "No API key configured. Set the {} environment variable. For Ollama, no API key is required.",
                ENV_OPENAI_API_KEY
            ));
        }

        if self.model.is_empty() {
            return Err(anyhow::anyhow!("Model is required"));
        }

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err(anyhow::anyhow!("max_tokens must be greater than 0"));
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow::anyhow!("temperature must be between 0.0 and 2.0"));
            }
        }

        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(anyhow::anyhow!("top_p must be between 0.0 and 1.0"));
            }
        }

        if self.max_age_ms <= 0 {
            return Err(anyhow::anyhow!("max_age_ms must be positive"));
        }

        Ok(())
    }

    /// Provider settings without credentials; the session installs the key
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            provider_type: self.provider.clone(),
            api_key: None,
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            ..Default::default()
        }
    }

    /// Default model settings for new sessions
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_name: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}
