//! Provider trait and factory for LLM providers

use async_trait::async_trait;
use crate::llm::{
    types::{ChatRequest, ProviderResponse, ProviderConfig},
    errors::{LlmError, LlmResult},
    openai::OpenAIProvider,
    ollama::OllamaProvider,
};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and get a response
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the model name
    fn model(&self) -> &str;

    /// Validate the configuration
    fn validate_config(&self) -> LlmResult<()>;
}

/// Factory for creating LLM providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a new provider from configuration
    pub fn create_provider(config: ProviderConfig) -> LlmResult<Box<dyn LlmProvider>> {
        match config.provider_type.as_str() {
            "openai" => {
                let provider = OpenAIProvider::new(config)?;
                Ok(Box::new(provider))
            }
            "ollama" => {
                let provider = OllamaProvider::new(config)?;
                Ok(Box::new(provider))
            }
            _ => Err(LlmError::ConfigError(format!(
                "Unsupported provider type: {}",
                config.provider_type
            ))),
        }
    }
}

/// Provider client options for flexible configuration
#[derive(Debug, Clone)]
pub struct ProviderClientOptions {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for ProviderClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_seconds: 300,
            user_agent: format!("kgchat/{}", crate::version::VERSION),
        }
    }
}

/// Utility functions for provider implementations
pub mod utils {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;
    use rand::Rng;

    /// Exponential backoff with jitter
    pub async fn exponential_backoff_with_jitter(attempt: u32, base_delay_ms: u64) {
        let jitter: f64 = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0.0..=1.0)
        };
        sleep(backoff_delay(attempt, base_delay_ms, jitter)).await;
    }

    /// Delay for a retry attempt, capped at 30 seconds
    pub fn backoff_delay(attempt: u32, base_delay_ms: u64, jitter: f64) -> Duration {
        let delay_ms = (base_delay_ms as f64 * 2.0_f64.powi(attempt as i32) * (1.0 + jitter)) as u64;
        Duration::from_millis(delay_ms.min(30000))
    }

    /// Check if an error is retryable
    pub fn is_retryable_error(error: &LlmError) -> bool {
        match error {
            LlmError::RateLimitError(_) => true,
            LlmError::HttpError(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map_or(false, |status| {
                        status.is_server_error() || status == 429 || status == 408
                    })
            }
            LlmError::TimeoutError(_) => true,
            _ => false,
        }
    }

    /// Pull a readable message out of an error body
    pub fn error_message_from_body(status: reqwest::StatusCode, text: &str) -> String {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
            if let Some(error) = json.get("error") {
                if let Some(message) = error.get("message") {
                    return format!("{}: {}", status, message.as_str().unwrap_or("Unknown error"));
                }
                if let Some(message) = error.as_str() {
                    return format!("{}: {}", status, message);
                }
            }
        }
        format!("{}: {}", status, text)
    }

    /// Extract error message from HTTP response
    pub async fn extract_error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(text) => error_message_from_body(status, &text),
            Err(_) => format!("{}: Failed to read error response", status),
        }
    }

    /// Map a failed HTTP status onto the error taxonomy
    pub fn classify_status(status: u16, error_msg: String) -> LlmError {
        match status {
            429 => LlmError::RateLimitError(error_msg),
            401 | 403 => LlmError::AuthError(error_msg),
            408 => LlmError::TimeoutError(error_msg),
            400 if error_msg.contains("context_length_exceeded") => {
                LlmError::ContextLimitError(error_msg)
            }
            _ => LlmError::ApiError(error_msg),
        }
    }
}
