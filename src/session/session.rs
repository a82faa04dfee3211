//! Per-session chat wrapper

use std::sync::Arc;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::{
        get_rag_agent_prompts, key_prefix, process_kg_config, Config, KgConfig, ModelConfig,
        MAX_AGE,
    },
    graph::{find_schema_info_node, GraphConnector, Neo4jConnector},
    llm::{LlmProvider, Message, ProviderConfig, TokenUsage},
    rag::{KgRagAgent, KgRagOptions},
    session::{ChatterFactory, Conversation, ErrorCode, SessionResult},
};

/// Current time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Everything a session needs to reach the outside world
#[derive(Clone)]
pub struct SessionBackend {
    pub provider_config: ProviderConfig,
    pub api_key: Option<String>,
    pub provider: Option<Arc<dyn LlmProvider>>,
    pub connector: Arc<dyn GraphConnector>,
    pub max_age: i64,
}

impl SessionBackend {
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider_config: config.provider_config(),
            api_key: config.api_key.clone(),
            provider: None,
            connector: Arc::new(Neo4jConnector),
            max_age: config.max_age_ms,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn GraphConnector>) -> Self {
        self.connector = connector;
        self
    }
}

impl Default for SessionBackend {
    fn default() -> Self {
        Self {
            provider_config: ProviderConfig::default(),
            api_key: None,
            provider: None,
            connector: Arc::new(Neo4jConnector),
            max_age: MAX_AGE,
        }
    }
}

/// Result of one chat turn
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub message: String,
    pub usage: TokenUsage,
    /// Knowledge-graph results injected into the prompt, if any
    pub injected_context: Vec<String>,
}

/// One client session: a conversation plus its model settings and lifetime
pub struct ChatSession {
    session_id: String,
    model_config: ModelConfig,
    rag_agent_prompts: Vec<String>,
    created_at: i64,
    refreshed_at: i64,
    max_age: i64,
    factory: ChatterFactory,
    connector: Arc<dyn GraphConnector>,
    chatter: Option<Conversation>,
}

impl ChatSession {
    pub fn new(
        session_id: Option<String>,
        model_config: Option<ModelConfig>,
        rag_agent_prompts: Option<Vec<String>>,
        backend: SessionBackend,
    ) -> Self {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let model_config = model_config.unwrap_or_default();
        let rag_agent_prompts = rag_agent_prompts.unwrap_or_else(|| get_rag_agent_prompts(None));

        debug!("Session ID: {}", session_id);
        debug!("Model config: {:?}", model_config);

        let provider_config = ProviderConfig {
            model: model_config.model_name.clone(),
            temperature: model_config.temperature.or(backend.provider_config.temperature),
            max_tokens: model_config.max_tokens.or(backend.provider_config.max_tokens),
            top_p: model_config.top_p.or(backend.provider_config.top_p),
            ..backend.provider_config.clone()
        };

        let mut factory = ChatterFactory::new(provider_config, rag_agent_prompts.clone(), session_id.clone())
            .with_api_key(backend.api_key.clone());
        if let Some(provider) = backend.provider.clone() {
            factory = factory.with_provider(provider);
        }

        let created_at = now_millis();
        let mut session = Self {
            session_id,
            model_config,
            rag_agent_prompts,
            created_at,
            refreshed_at: created_at,
            max_age: backend.max_age,
            factory,
            connector: backend.connector,
            chatter: None,
        };
        session.chatter = Some(session.create_chatter());
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    pub fn model_name(&self) -> &str {
        &self.model_config.model_name
    }

    pub fn rag_agent_prompts(&self) -> &[String] {
        &self.rag_agent_prompts
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn refreshed_at(&self) -> i64 {
        self.refreshed_at
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn chatter(&self) -> Option<&Conversation> {
        self.chatter.as_ref()
    }

    /// Build a conversation for this session's model and credentials
    pub fn create_chatter(&self) -> Conversation {
        self.factory.create()
    }

    /// Push the expiry deadline out from now
    pub fn refresh(&mut self) {
        self.refreshed_at = now_millis();
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.refreshed_at + self.max_age
    }

    /// Run one chat turn. The last message is the query; the ones before it
    /// become the conversation history. Returns `None` when there is nothing
    /// to do: no chatter, no messages, or no api key.
    pub async fn chat(
        &mut self,
        messages: &[Message],
        use_kg: bool,
        kg_config: Option<&KgConfig>,
    ) -> SessionResult<Option<ChatReply>> {
        if self.chatter.is_none() {
            return Ok(None);
        }
        debug!("Chatter..ok");

        let Some((last, history)) = messages.split_last() else {
            return Ok(None);
        };
        debug!("Messages..ok");

        let api_key = if self.factory.has_provider() {
            None
        } else {
            let api_key = self.factory.api_key();
            debug!("Using api_key : {}...", key_prefix(api_key.as_deref()));
            if api_key.is_none() {
                return Ok(None);
            }
            api_key
        };

        if let (Some(chatter), Some(api_key)) = (self.chatter.as_mut(), api_key.as_deref()) {
            if !chatter.has_api_key() {
                trace!("Installing api key on chatter");
                chatter.set_api_key(api_key, &self.session_id)?;
            }
        }

        if use_kg {
            debug!("Using KG, config: {:?}", kg_config);
            if let Err(code) = self.update_kg(kg_config).await {
                warn!("Continuing without knowledge graph: {}", code);
            }
        }

        debug!("history: {:?}", history);
        self.setup_messages(history);

        let Some(chatter) = self.chatter.as_mut() else {
            return Ok(None);
        };
        let response = match chatter.query(&last.content).await {
            Ok(response) => response,
            Err(e) => {
                error!("{}", e);
                return Err(e.into());
            }
        };

        let injected_context = chatter.last_injected_context().to_vec();
        debug!("msg: {}", response.content);
        debug!("usage: {:?}", response.usage);
        debug!("injection: {:?}", injected_context);

        self.refresh();

        Ok(Some(ChatReply {
            message: response.content,
            usage: response.usage,
            injected_context,
        }))
    }

    /// Replace the conversation history with `messages`
    pub fn setup_messages(&mut self, messages: &[Message]) -> bool {
        let Some(chatter) = self.chatter.as_mut() else {
            return false;
        };
        chatter.clear_messages();
        for message in messages {
            chatter.append_message(message);
        }
        true
    }

    /// Attach a knowledge-graph agent built from `kg_config`, replacing any
    /// previous one.
    pub async fn update_kg(&mut self, kg_config: Option<&KgConfig>) -> Result<(), ErrorCode> {
        debug!("Updating KG_RAG agent");

        let Some(kg_config) = kg_config.filter(|cfg| cfg.connection_args.is_some()) else {
            error!("missing connection args in {:?}", kg_config);
            return Err(ErrorCode::InvalidInput);
        };

        let kg_config = process_kg_config(kg_config.clone());
        let Some(connection_args) = kg_config.connection_args.clone() else {
            return Err(ErrorCode::InvalidInput);
        };

        debug!("Connecting using {:?}", connection_args);
        let Some(schema_info) = find_schema_info_node(self.connector.as_ref(), &connection_args).await else {
            error!("missing schema_info in the graph");
            return Err(ErrorCode::NotFound);
        };
        info!("Successfully got schema {}", schema_info);

        let n_results = kg_config.n_results();
        debug!("Expecting {} results", n_results);

        let options = KgRagOptions {
            schema_info: Some(schema_info),
            description: kg_config.description.clone(),
            chatter_factory: Some(self.factory.clone()),
            n_results,
            use_prompt: true,
            use_reflexion: true,
            ..KgRagOptions::new(connection_args)
        };

        let agent = match KgRagAgent::connect(self.connector.as_ref(), options).await {
            Ok(agent) => agent,
            Err(e) => {
                error!("{}", e);
                return Err(ErrorCode::UnknownError);
            }
        };

        match self.chatter.as_mut() {
            Some(chatter) => {
                chatter.set_rag_agent(Arc::new(agent));
                Ok(())
            }
            None => {
                error!("No chatter to attach the KG agent to");
                Err(ErrorCode::UnknownError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{FakeConnector, FakeGraph};
    use crate::llm::testing::ScriptedProvider;
    use crate::config::DbConnectionArgs;
    use crate::session::SessionError;
    use serde_json::json;

    fn backend(provider: Arc<ScriptedProvider>, connector: FakeConnector) -> SessionBackend {
        SessionBackend::default()
            .with_provider(provider)
            .with_connector(Arc::new(connector))
    }

    fn kg_config() -> KgConfig {
        KgConfig {
            result_num: Some(1),
            ..KgConfig::new(DbConnectionArgs::new("graph.example.org", Some("7687".to_string())))
        }
    }

    #[test]
    fn test_new_session_defaults() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let session = ChatSession::new(None, None, None, backend(provider, FakeConnector::unreachable()));

        assert!(Uuid::parse_str(session.session_id()).is_ok());
        assert_eq!(session.model_name(), crate::config::DEFAULT_MODEL);
        assert_eq!(session.rag_agent_prompts(), get_rag_agent_prompts(None).as_slice());
        assert_eq!(session.created_at(), session.refreshed_at());
        assert_eq!(session.max_age(), MAX_AGE);
        assert!(session.chatter().is_some());
    }

    #[test]
    fn test_expiry() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let mut backend = backend(provider, FakeConnector::unreachable());
        backend.max_age = 1000;
        let session = ChatSession::new(Some("s1".to_string()), None, None, backend);

        let refreshed = session.refreshed_at();
        assert!(!session.is_expired(refreshed + 1000));
        assert!(session.is_expired(refreshed + 1001));
    }

    #[tokio::test]
    async fn test_chat_splits_history_and_query() {
        let provider = Arc::new(ScriptedProvider::new(vec!["Paris."]));
        let mut session = ChatSession::new(
            Some("s1".to_string()),
            Some(ModelConfig { model_name: "gpt-4o".to_string(), ..Default::default() }),
            None,
            backend(provider.clone(), FakeConnector::unreachable()),
        );

        let messages = vec![
            Message::system("You are a geographer."),
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("Capital of France?"),
        ];
        let reply = session.chat(&messages, false, None).await.unwrap().unwrap();

        assert_eq!(reply.message, "Paris.");
        assert_eq!(reply.usage.total_tokens, 15);
        assert!(reply.injected_context.is_empty());

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages, messages);
    }

    #[tokio::test]
    async fn test_chat_without_api_key_returns_none() {
        let _env = crate::config::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let saved = std::env::var(crate::config::ENV_OPENAI_API_KEY).ok();
        std::env::remove_var(crate::config::ENV_OPENAI_API_KEY);

        let backend = SessionBackend::default().with_connector(Arc::new(FakeConnector::unreachable()));
        let mut session = ChatSession::new(None, None, None, backend);
        assert!(!session.chatter().unwrap().has_api_key());
        let result = session.chat(&[Message::user("hi")], false, None).await;

        if let Some(key) = saved {
            std::env::set_var(crate::config::ENV_OPENAI_API_KEY, key);
        }
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_configured_api_key_is_installed_on_chatter() {
        let backend = SessionBackend {
            api_key: Some("sk-session-key".to_string()),
            ..SessionBackend::default()
        }
        .with_connector(Arc::new(FakeConnector::unreachable()));
        let session = ChatSession::new(Some("s-key".to_string()), None, None, backend);
        assert!(session.chatter().unwrap().has_api_key());
    }

    #[tokio::test]
    async fn test_ollama_config_from_file_reaches_provider() {
        let mut config = Config::default();
        config.merge_with(Config {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            base_url: Some("http://127.0.0.1:9".to_string()),
            ..Default::default()
        });
        config.finalize(None);

        let backend = SessionBackend::from_config(&config).with_connector(Arc::new(FakeConnector::unreachable()));
        let mut session = ChatSession::new(None, Some(config.model_config()), None, backend);
        assert!(session.chatter().unwrap().has_api_key());

        // Nothing listens on the discard port, so the request itself must fail.
        let result = session.chat(&[Message::user("hi")], false, None).await;
        assert!(matches!(result, Err(SessionError::Llm(_))));
    }

    #[tokio::test]
    async fn test_chat_with_no_messages_returns_none() {
        let provider = Arc::new(ScriptedProvider::new(vec!["unused"]));
        let mut session = ChatSession::new(None, None, None, backend(provider.clone(), FakeConnector::unreachable()));
        assert!(session.chat(&[], false, None).await.unwrap().is_none());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_propagates_provider_errors() {
        let provider = Arc::new(ScriptedProvider::failing("rate limited"));
        let mut session = ChatSession::new(None, None, None, backend(provider, FakeConnector::unreachable()));
        let result = session.chat(&[Message::user("hi")], false, None).await;
        assert!(matches!(result, Err(SessionError::Llm(_))));
    }

    #[tokio::test]
    async fn test_update_kg_error_codes() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));

        let mut session = ChatSession::new(None, None, None, backend(provider.clone(), FakeConnector::unreachable()));
        assert_eq!(session.update_kg(None).await, Err(ErrorCode::InvalidInput));
        assert_eq!(session.update_kg(Some(&KgConfig::default())).await, Err(ErrorCode::InvalidInput));
        assert_eq!(session.update_kg(Some(&kg_config())).await, Err(ErrorCode::NotFound));

        let connector = FakeConnector::new(FakeGraph::default());
        let mut session = ChatSession::new(None, None, None, backend(provider.clone(), connector));
        assert_eq!(session.update_kg(Some(&kg_config())).await, Err(ErrorCode::NotFound));

        let connector = FakeConnector::new(FakeGraph::with_schema(json!({"gene": {}})));
        let mut session = ChatSession::new(None, None, None, backend(provider, connector));
        assert_eq!(session.update_kg(Some(&kg_config())).await, Ok(()));
        assert!(session.chatter().unwrap().rag_agent().is_some());
    }

    #[tokio::test]
    async fn test_chat_with_kg_injects_graph_results() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "MATCH (g:Gene) RETURN g",
            "TP53 is in the graph.",
        ]));
        let graph = FakeGraph::with_schema(json!({"gene": {"represented_as": "node"}}))
            .respond("(g:Gene)", vec![json!({"g": {"name": "TP53"}})]);
        let mut session = ChatSession::new(
            None,
            None,
            None,
            backend(provider.clone(), FakeConnector::new(graph)),
        );

        let kg_config = KgConfig {
            description: Some("human genes".to_string()),
            ..kg_config()
        };
        let reply = session
            .chat(&[Message::user("Which genes?")], true, Some(&kg_config))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.message, "TP53 is in the graph.");
        assert_eq!(reply.injected_context.len(), 1);
        assert!(reply.injected_context[0].contains("TP53"));

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].messages[0].content.contains("human genes"));
        let primary = &requests[1].messages;
        assert_eq!(primary.len(), 2);
        assert!(primary[0].content.contains("TP53"));
        assert_eq!(primary[1], Message::user("Which genes?"));
    }

    #[tokio::test]
    async fn test_chat_with_unreachable_kg_still_answers() {
        let provider = Arc::new(ScriptedProvider::new(vec!["Plain answer."]));
        let mut session = ChatSession::new(None, None, None, backend(provider, FakeConnector::unreachable()));

        let reply = session
            .chat(&[Message::user("Which genes?")], true, Some(&kg_config()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.message, "Plain answer.");
        assert!(reply.injected_context.is_empty());
    }
}
