//! Conversation state and the primary LLM call

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    config::{get_api_key, key_prefix},
    llm::{
        ChatRequest, LlmError, LlmProvider, LlmResult, Message, MessageRole, ProviderConfig,
        ProviderFactory, ProviderResponse,
    },
    rag::RagAgent,
};

/// A chat transcript bound to one provider, with an optional retrieval agent
pub struct Conversation {
    provider_config: ProviderConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    messages: Vec<Message>,
    rag_agent_prompts: Vec<String>,
    rag_agent: Option<Arc<dyn RagAgent>>,
    last_injected_context: Vec<String>,
}

impl Conversation {
    /// Create a conversation with no credentials installed yet
    pub fn new(provider_config: ProviderConfig, rag_agent_prompts: Vec<String>) -> Self {
        Self {
            provider_config,
            provider: None,
            messages: Vec::new(),
            rag_agent_prompts,
            rag_agent: None,
            last_injected_context: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.provider_config.model
    }

    /// Whether a provider client has been built
    pub fn has_api_key(&self) -> bool {
        self.provider.is_some()
    }

    /// Build the provider client with `api_key`, tagging requests with `user`.
    pub fn set_api_key(&mut self, api_key: &str, user: &str) -> LlmResult<()> {
        debug!("Installing api key {}... for {}", key_prefix(Some(api_key)), user);
        let config = ProviderConfig {
            api_key: Some(api_key.to_string()),
            user: Some(user.to_string()),
            ..self.provider_config.clone()
        };
        let provider = ProviderFactory::create_provider(config.clone())?;
        provider.validate_config()?;
        self.provider = Some(Arc::from(provider));
        self.provider_config = ProviderConfig { api_key: None, ..config };
        Ok(())
    }

    pub fn append_system_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn append_ai_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn append_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn append_message(&mut self, message: &Message) {
        match message.role {
            MessageRole::System => self.append_system_message(message.content.clone()),
            MessageRole::Assistant => self.append_ai_message(message.content.clone()),
            MessageRole::User => self.append_user_message(message.content.clone()),
        }
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Attach a retrieval agent, replacing any previous one
    pub fn set_rag_agent(&mut self, agent: Arc<dyn RagAgent>) {
        if self.rag_agent.is_some() {
            debug!("Replacing existing rag agent");
        }
        self.rag_agent = Some(agent);
    }

    pub fn rag_agent(&self) -> Option<&Arc<dyn RagAgent>> {
        self.rag_agent.as_ref()
    }

    /// Context injected into the most recent query
    pub fn last_injected_context(&self) -> &[String] {
        &self.last_injected_context
    }

    fn injection_message(&self, context: &[String]) -> Message {
        let mut text = self.rag_agent_prompts.join("\n");
        for snippet in context {
            text.push('\n');
            text.push_str(snippet);
        }
        Message::system(text)
    }

    /// Append `text` as a user message, enrich it with retrieved context when
    /// an agent is attached, and record the model's reply.
    pub async fn query(&mut self, text: &str) -> LlmResult<ProviderResponse> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| LlmError::ConfigError("API key has not been set".to_string()))?;

        self.append_user_message(text);
        self.last_injected_context.clear();

        let mut request_messages = self.messages.clone();

        if let Some(agent) = self.rag_agent.clone() {
            match agent.retrieve(text).await {
                Ok(context) if !context.is_empty() => {
                    info!("Injecting {} {} result(s)", context.len(), agent.mode());
                    let injection = self.injection_message(&context);
                    request_messages.insert(request_messages.len() - 1, injection);
                    self.last_injected_context = context;
                }
                Ok(_) => debug!("Retrieval returned no context"),
                Err(e) => warn!("Retrieval failed, answering without context: {}", e),
            }
        }

        match provider.chat_completion(ChatRequest::new(request_messages)).await {
            Ok(response) => {
                self.append_ai_message(response.content.clone());
                Ok(response)
            }
            Err(e) => {
                error!("Provider {} failed: {}", provider.name(), e);
                Err(e)
            }
        }
    }
}

/// Builds conversations for one session; also hands fresh ones to retrieval agents
#[derive(Clone)]
pub struct ChatterFactory {
    provider_config: ProviderConfig,
    rag_agent_prompts: Vec<String>,
    session_id: String,
    api_key: Option<String>,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl ChatterFactory {
    pub fn new(provider_config: ProviderConfig, rag_agent_prompts: Vec<String>, session_id: String) -> Self {
        Self {
            provider_config,
            rag_agent_prompts,
            session_id,
            api_key: None,
            provider: None,
        }
    }

    /// Use a fixed key instead of reading `OPENAI_API_KEY`
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Use an existing provider client instead of building one per conversation
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(get_api_key)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn create(&self) -> Conversation {
        info!("Creating conversation for model {}", self.provider_config.model);
        let conversation = Conversation::new(self.provider_config.clone(), self.rag_agent_prompts.clone());

        if let Some(provider) = &self.provider {
            return conversation.with_provider(provider.clone());
        }

        let mut conversation = conversation;
        match self.api_key() {
            Some(key) => {
                if let Err(e) = conversation.set_api_key(&key, &self.session_id) {
                    error!("Failed to set api key: {}", e);
                }
            }
            None => warn!("No api key available for session {}", self.session_id),
        }
        conversation
    }
}
