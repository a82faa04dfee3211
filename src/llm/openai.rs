//! OpenAI provider implementation

use async_trait::async_trait;
use std::time::Duration;
use reqwest::{Client, header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::llm::{
    provider::{LlmProvider, ProviderClientOptions, utils},
    types::{ChatRequest, ProviderResponse, ProviderConfig, Message, TokenUsage, FinishReason},
    errors::{LlmError, LlmResult},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI API provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
    options: ProviderClientOptions,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let mut headers = HeaderMap::new();

        match config.api_key.as_deref() {
            Some(api_key) if !api_key.is_empty() => {
                let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .map_err(|e| LlmError::ConfigError(format!("Invalid API key: {}", e)))?;
                headers.insert(AUTHORIZATION, auth_value);
            }
            _ => return Err(LlmError::ConfigError("API key is required".to_string())),
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let options = ProviderClientOptions::default();
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(options.timeout_seconds))
            .user_agent(&options.user_agent)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            options,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
        messages
            .iter()
            .map(|msg| OpenAIMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn get_endpoint(&self) -> String {
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut request_body = json!({
            "model": self.config.model,
            "messages": Self::convert_messages(&request.messages),
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens.or(self.config.max_tokens) {
            request_body["max_tokens"] = json!(max_tokens);
        }

        if let Some(temperature) = request.temperature.or(self.config.temperature) {
            request_body["temperature"] = json!(temperature);
        }

        if let Some(top_p) = request.top_p.or(self.config.top_p) {
            request_body["top_p"] = json!(top_p);
        }

        if let Some(user) = &self.config.user {
            request_body["user"] = json!(user);
        }

        request_body
    }

    /// Execute request with retries
    async fn execute_request<T>(&self, request_body: serde_json::Value) -> LlmResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let mut last_error = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                debug!("Retrying OpenAI request, attempt {}", attempt);
                utils::exponential_backoff_with_jitter(attempt, self.options.retry_delay_ms).await;
            }

            let response = self.client
                .post(self.get_endpoint())
                .json(&request_body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    if resp.status().is_success() {
                        match resp.json::<T>().await {
                            Ok(result) => return Ok(result),
                            Err(e) => {
                                last_error = Some(LlmError::HttpError(e));
                                continue;
                            }
                        }
                    } else {
                        let status = resp.status();
                        let error_msg = utils::extract_error_message(resp).await;
                        let error = utils::classify_status(status.as_u16(), error_msg);

                        if !utils::is_retryable_error(&error) || attempt == self.options.max_retries {
                            return Err(error);
                        }

                        last_error = Some(error);
                    }
                }
                Err(e) => {
                    let error = LlmError::HttpError(e);
                    if !utils::is_retryable_error(&error) || attempt == self.options.max_retries {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::ApiError("Unknown error".to_string())))
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse> {
        let request_body = self.build_request_body(&request);
        let response: OpenAIResponse = self.execute_request(request_body).await?;

        let choice = response.choices.into_iter().next()
            .ok_or_else(|| LlmError::ApiError("No choices in response".to_string()))?;

        let usage = response.usage.unwrap_or_default();

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn validate_config(&self) -> LlmResult<()> {
        if self.config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(LlmError::ConfigError("API key is required".to_string()));
        }

        if self.config.model.is_empty() {
            return Err(LlmError::ConfigError("Model is required".to_string()));
        }

        Ok(())
    }
}

// OpenAI API types
#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
