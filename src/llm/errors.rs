//! Error types for LLM providers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Context limit exceeded: {0}")]
    ContextLimitError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),
}

pub type LlmResult<T> = Result<T, LlmError>;
