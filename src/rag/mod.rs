//! Retrieval agents that inject external context into a conversation

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    config::{process_connection_args, DbConnectionArgs, RESULT_NUM_DEFAULT},
    graph::{find_schema_info_node, GraphConnector, GraphError},
    llm::LlmError,
};

mod kg;

pub use kg::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagAgentMode {
    KnowledgeGraph,
}

impl fmt::Display for RagAgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagAgentMode::KnowledgeGraph => write!(f, "kg"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("no conversation available to generate a query")]
    NoConversation,

    #[error("model returned an empty query")]
    EmptyQuery,
}

pub type RagResult<T> = Result<T, RagError>;

/// A source of context snippets for a user question
#[async_trait]
pub trait RagAgent: Send + Sync {
    fn mode(&self) -> RagAgentMode;

    async fn is_connected(&self) -> bool;

    /// Snippets relevant to `question`, already formatted for injection
    async fn retrieve(&self, question: &str) -> RagResult<Vec<String>>;
}

/// Whether a knowledge graph is reachable with these connection arguments.
/// Every failure is logged and reported as `false`.
pub async fn get_kg_connection_status(
    connector: &dyn GraphConnector,
    connection_args: Option<DbConnectionArgs>,
) -> bool {
    let Some(connection_args) = connection_args else {
        return false;
    };

    let connection_args = process_connection_args(connection_args);
    let schema_info = find_schema_info_node(connector, &connection_args).await;

    let options = KgRagOptions {
        schema_info,
        n_results: RESULT_NUM_DEFAULT,
        ..KgRagOptions::new(connection_args)
    };

    match KgRagAgent::connect(connector, options).await {
        Ok(agent) => {
            let connected = agent.is_connected().await;
            debug!("Agent connected: {}", connected);
            connected
        }
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}
