use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    config::{DbConnectionArgs, RESULT_NUM_DEFAULT},
    graph::{GraphClient, GraphConnector, GraphRow},
    session::{ChatterFactory, Conversation},
};

use super::{RagAgent, RagAgentMode, RagError, RagResult};

/// Settings for a knowledge-graph retrieval agent
#[derive(Clone)]
pub struct KgRagOptions {
    pub connection_args: DbConnectionArgs,
    pub schema_info: Option<serde_json::Value>,
    /// What the graph holds, in words
    pub description: Option<String>,
    /// Builds the conversation used to write Cypher
    pub chatter_factory: Option<ChatterFactory>,
    pub n_results: usize,
    /// Inject retrieved rows into the chat; without it retrieval is a no-op
    pub use_prompt: bool,
    /// Give the model one chance to repair a failing or empty query
    pub use_reflexion: bool,
}

impl KgRagOptions {
    pub fn new(connection_args: DbConnectionArgs) -> Self {
        Self {
            connection_args,
            schema_info: None,
            description: None,
            chatter_factory: None,
            n_results: RESULT_NUM_DEFAULT,
            use_prompt: false,
            use_reflexion: false,
        }
    }
}

/// Answers questions by having the model write Cypher against the graph schema
pub struct KgRagAgent {
    options: KgRagOptions,
    graph: Arc<dyn GraphClient>,
}

impl KgRagAgent {
    pub async fn connect(connector: &dyn GraphConnector, options: KgRagOptions) -> RagResult<Self> {
        let graph = connector.connect(&options.connection_args).await?;
        info!("KG agent connected to {}", options.connection_args.bolt_uri());
        Ok(Self::with_graph(graph, options))
    }

    pub fn with_graph(graph: Arc<dyn GraphClient>, options: KgRagOptions) -> Self {
        Self { options, graph }
    }

    fn query_prompt(&self) -> String {
        let schema = self
            .options
            .schema_info
            .as_ref()
            .map(|schema| serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()))
            .unwrap_or_else(|| "(no schema information available)".to_string());

        let mut prompt = format!(
            "You write Cypher queries for a Neo4j knowledge graph with the following schema:\n{}\n",
            schema
        );
        if let Some(description) = self.options.description.as_deref().filter(|d| !d.is_empty()) {
            prompt.push_str(&format!("The graph contains: {}\n", description));
        }
        prompt.push_str(&format!(
            "Answer every question with a single read-only Cypher query that returns at most {} rows. \
             Reply with the query only, without explanation.",
            self.options.n_results
        ));
        prompt
    }

    async fn ask_for_query(&self, conversation: &mut Conversation, prompt: &str) -> RagResult<String> {
        let reply = conversation.query(prompt).await?;
        let cypher = extract_cypher(&reply.content);
        if cypher.is_empty() {
            return Err(RagError::EmptyQuery);
        }
        Ok(apply_limit(&cypher, self.options.n_results))
    }

    async fn run_with_reflexion(
        &self,
        conversation: &mut Conversation,
        cypher: String,
    ) -> RagResult<Vec<GraphRow>> {
        let first = self.graph.query(&cypher).await;
        let feedback = match &first {
            Ok(rows) if !rows.is_empty() => None,
            Ok(_) => Some("returned no results".to_string()),
            Err(e) => Some(format!("failed with: {}", e)),
        };

        let Some(feedback) = feedback.filter(|_| self.options.use_reflexion) else {
            return Ok(first?);
        };

        warn!("Cypher query {}, asking the model to correct it", feedback);
        let corrected = self
            .ask_for_query(
                conversation,
                &format!(
                    "The query `{}` {}. Reply with a corrected Cypher query only.",
                    cypher, feedback
                ),
            )
            .await?;
        debug!("Corrected cypher: {}", corrected);
        Ok(self.graph.query(&corrected).await?)
    }
}

#[async_trait]
impl RagAgent for KgRagAgent {
    fn mode(&self) -> RagAgentMode {
        RagAgentMode::KnowledgeGraph
    }

    async fn is_connected(&self) -> bool {
        self.graph.is_connected().await
    }

    async fn retrieve(&self, question: &str) -> RagResult<Vec<String>> {
        if !self.options.use_prompt {
            return Ok(Vec::new());
        }

        let factory = self
            .options
            .chatter_factory
            .as_ref()
            .ok_or(RagError::NoConversation)?;
        let mut conversation = factory.create();
        conversation.append_system_message(self.query_prompt());

        let cypher = self.ask_for_query(&mut conversation, question).await?;
        debug!("Generated cypher: {}", cypher);

        let rows = self.run_with_reflexion(&mut conversation, cypher).await?;
        Ok(rows
            .into_iter()
            .take(self.options.n_results)
            .map(|row| serde_json::Value::Object(row).to_string())
            .collect())
    }
}

/// Pull the query out of a model reply, dropping code fences and a trailing `;`.
pub fn extract_cypher(reply: &str) -> String {
    let trimmed = reply.trim();
    let body = match trimmed.find("```") {
        Some(start) => {
            let after = &trimmed[start + 3..];
            let after = after
                .strip_prefix("cypher")
                .or_else(|| after.strip_prefix("Cypher"))
                .unwrap_or(after);
            match after.find("```") {
                Some(end) => &after[..end],
                None => after,
            }
        }
        None => trimmed,
    };
    body.trim().trim_end_matches(';').trim().to_string()
}

/// Append `LIMIT n` unless the query already limits its rows.
pub fn apply_limit(cypher: &str, n_results: usize) -> String {
    let has_limit = cypher
        .split_whitespace()
        .any(|token| token.eq_ignore_ascii_case("limit"));
    if has_limit {
        cypher.to_string()
    } else {
        format!("{} LIMIT {}", cypher, n_results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::FakeGraph;
    use crate::llm::{testing::ScriptedProvider, ProviderConfig};
    use serde_json::json;

    fn agent(graph: FakeGraph, provider: ScriptedProvider, use_reflexion: bool) -> (KgRagAgent, Arc<FakeGraph>, Arc<ScriptedProvider>) {
        let graph = Arc::new(graph);
        let provider = Arc::new(provider);
        let factory = ChatterFactory::new(ProviderConfig::default(), Vec::new(), "kg-test".to_string())
            .with_provider(provider.clone());
        let options = KgRagOptions {
            schema_info: Some(json!({"gene": {"represented_as": "node"}})),
            chatter_factory: Some(factory),
            n_results: 2,
            use_prompt: true,
            use_reflexion,
            ..KgRagOptions::new(DbConnectionArgs::new("localhost", None))
        };
        (KgRagAgent::with_graph(graph.clone(), options), graph, provider)
    }

    #[test]
    fn test_extract_cypher() {
        assert_eq!(extract_cypher("MATCH (n) RETURN n;"), "MATCH (n) RETURN n");
        assert_eq!(
            extract_cypher("Here you go:\n```cypher\nMATCH (g:Gene) RETURN g\n```"),
            "MATCH (g:Gene) RETURN g"
        );
        assert_eq!(extract_cypher("```\nRETURN 1\n```"), "RETURN 1");
        assert_eq!(extract_cypher("   "), "");
    }

    #[test]
    fn test_apply_limit() {
        assert_eq!(apply_limit("MATCH (n) RETURN n", 3), "MATCH (n) RETURN n LIMIT 3");
        assert_eq!(apply_limit("MATCH (n) RETURN n limit 10", 3), "MATCH (n) RETURN n limit 10");
    }

    #[tokio::test]
    async fn test_retrieve_runs_generated_query() {
        let graph = FakeGraph::default().respond(
            "Gene",
            vec![json!({"g": {"name": "TP53"}}), json!({"g": {"name": "BRCA1"}}), json!({"g": {"name": "EGFR"}})],
        );
        let provider = ScriptedProvider::new(vec!["```cypher\nMATCH (g:Gene) RETURN g\n```"]);
        let (agent, graph, provider) = agent(graph, provider, false);

        let snippets = agent.retrieve("Which genes are there?").await.unwrap();
        assert_eq!(snippets.len(), 2);
        assert!(snippets[0].contains("TP53"));

        let queries = graph.queries.lock().unwrap();
        assert_eq!(queries.as_slice(), ["MATCH (g:Gene) RETURN g LIMIT 2".to_string()]);

        let requests = provider.requests.lock().unwrap();
        let system = &requests[0].messages[0];
        assert!(system.content.contains("represented_as"));
        assert!(!system.content.contains("The graph contains"));
        assert_eq!(requests[0].messages[1].content, "Which genes are there?");
    }

    #[tokio::test]
    async fn test_description_reaches_query_prompt() {
        let graph = Arc::new(FakeGraph::default());
        let provider = Arc::new(ScriptedProvider::new(vec!["MATCH (g:Gene) RETURN g"]));
        let factory = ChatterFactory::new(ProviderConfig::default(), Vec::new(), "kg-test".to_string())
            .with_provider(provider.clone());
        let options = KgRagOptions {
            description: Some("genes and the proteins they encode".to_string()),
            chatter_factory: Some(factory),
            use_prompt: true,
            ..KgRagOptions::new(DbConnectionArgs::new("localhost", None))
        };
        let agent = KgRagAgent::with_graph(graph, options);

        assert!(agent.retrieve("genes?").await.unwrap().is_empty());
        let requests = provider.requests.lock().unwrap();
        assert!(requests[0].messages[0]
            .content
            .contains("The graph contains: genes and the proteins they encode"));
    }

    #[tokio::test]
    async fn test_reflexion_repairs_failed_query() {
        let graph = FakeGraph::default()
            .fail("Gen)", "syntax error")
            .respond("Gene)", vec![json!({"g": {"name": "TP53"}})]);
        let provider = ScriptedProvider::new(vec!["MATCH (g:Gen) RETURN g", "MATCH (g:Gene) RETURN g"]);
        let (agent, graph, provider) = agent(graph, provider, true);

        let snippets = agent.retrieve("genes?").await.unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(graph.queries.lock().unwrap().len(), 2);

        let requests = provider.requests.lock().unwrap();
        let feedback = &requests[1].messages.last().unwrap().content;
        assert!(feedback.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_failed_query_without_reflexion_errors() {
        let graph = FakeGraph::default().fail("Gen)", "syntax error");
        let provider = ScriptedProvider::new(vec!["MATCH (g:Gen) RETURN g"]);
        let (agent, _, _) = agent(graph, provider, false);

        assert!(matches!(agent.retrieve("genes?").await, Err(RagError::Graph(_))));
    }

    #[tokio::test]
    async fn test_retrieve_without_prompt_is_noop() {
        let graph = Arc::new(FakeGraph::default());
        let agent = KgRagAgent::with_graph(graph.clone(), KgRagOptions::new(DbConnectionArgs::default()));
        assert!(agent.retrieve("anything").await.unwrap().is_empty());
        assert!(graph.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_requires_conversation() {
        let options = KgRagOptions {
            use_prompt: true,
            ..KgRagOptions::new(DbConnectionArgs::default())
        };
        let agent = KgRagAgent::with_graph(Arc::new(FakeGraph::default()), options);
        assert!(matches!(agent.retrieve("q").await, Err(RagError::NoConversation)));
    }
}
