//! LLM provider abstractions and implementations
//!
//! A single non-streaming chat-completion interface over the OpenAI API and
//! a local Ollama server, with retry handling for transient HTTP failures.

pub mod provider;
pub mod types;
pub mod openai;
pub mod ollama;
pub mod errors;

pub use provider::*;
pub use types::*;
pub use errors::*;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex};

    /// Provider replaying canned replies and recording every request
    pub struct ScriptedProvider {
        replies: Mutex<VecDeque<LlmResult<String>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            let provider = Self::new(Vec::new());
            provider
                .replies
                .lock()
                .unwrap()
                .push_back(Err(LlmError::ApiError(message.to_string())));
            provider
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat_completion(&self, request: ChatRequest) -> LlmResult<ProviderResponse> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::ApiError("script exhausted".to_string())))?;
            Ok(ProviderResponse {
                content: reply,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                finish_reason: Some(FinishReason::Stop),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        fn validate_config(&self) -> LlmResult<()> {
            Ok(())
        }
    }
}
