use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    provider::{utils, LlmProvider},
    types::{ChatRequest, FinishReason, Message, ProviderConfig, ProviderResponse, TokenUsage},
    errors::{LlmError, LlmResult},
};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Local Ollama server speaking the `/api/chat` protocol
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    default_model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Default, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider from configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            default_model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn build_request(&self, request: &ChatRequest) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.default_model.clone(),
            messages: Self::convert_messages(&request.messages),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature.or(self.temperature),
                num_predict: request.max_tokens.or(self.max_tokens),
                top_p: request.top_p,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        debug!("Sending Ollama chat request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_msg = utils::extract_error_message(response).await;
            return Err(utils::classify_status(status.as_u16(), error_msg));
        }

        let ollama_response: OllamaChatResponse = response.json().await?;

        let prompt_tokens = ollama_response.prompt_eval_count.unwrap_or(0);
        let completion_tokens = ollama_response.eval_count.unwrap_or(0);

        Ok(ProviderResponse {
            content: ollama_response.message.content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            finish_reason: if ollama_response.done { Some(FinishReason::Stop) } else { None },
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.default_model
    }

    fn validate_config(&self) -> LlmResult<()> {
        if self.default_model.is_empty() {
            return Err(LlmError::ConfigError("Model is required".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages() {
        let messages = vec![
            Message::user("Hello"),
            Message::assistant("Hi there!"),
        ];

        let ollama_messages = OllamaProvider::convert_messages(&messages);

        assert_eq!(ollama_messages.len(), 2);
        assert_eq!(ollama_messages[0].role, "user");
        assert_eq!(ollama_messages[0].content, "Hello");
        assert_eq!(ollama_messages[1].role, "assistant");
    }

    #[test]
    fn test_ollama_provider_creation() {
        let config = ProviderConfig {
            provider_type: "ollama".to_string(),
            model: "llama3".to_string(),
            ..Default::default()
        };
        let provider = OllamaProvider::new(config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "llama3");
        assert!(provider.validate_config().is_ok());
    }

    #[test]
    fn test_request_options_fall_back_to_config() {
        let config = ProviderConfig {
            provider_type: "ollama".to_string(),
            model: "mistral".to_string(),
            base_url: Some("http://custom-ollama:8080".to_string()),
            temperature: Some(0.1),
            max_tokens: Some(256),
            ..Default::default()
        };
        let provider = OllamaProvider::new(config).unwrap();
        let mut request = ChatRequest::new(vec![Message::user("hi")]);
        request.temperature = Some(0.9);

        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(body["model"], "mistral");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 256);
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
        assert!(body["options"].get("top_p").is_none());
    }
}
