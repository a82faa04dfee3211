//! Bolt client for Neo4j-compatible graph databases

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph};
use tracing::{debug, warn};

use crate::config::{
    DbConnectionArgs, ENV_KG_DB, NEO4J_DEFAULT_DB, NEO4J_DEFAULT_PASSWORD, NEO4J_DEFAULT_USER,
};

use super::{GraphClient, GraphConnector, GraphError, GraphResult, GraphRow};

/// Database name from the arguments, else `KGDB`, else the Neo4j default
pub fn resolve_db_name(connection_args: &DbConnectionArgs) -> String {
    connection_args
        .db_name
        .clone()
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var(ENV_KG_DB).ok())
        .unwrap_or_else(|| NEO4J_DEFAULT_DB.to_string())
}

pub struct Neo4jClient {
    graph: Graph,
    uri: String,
}

impl Neo4jClient {
    pub async fn connect(connection_args: &DbConnectionArgs) -> GraphResult<Self> {
        let uri = connection_args.bolt_uri();
        let db_name = resolve_db_name(connection_args);
        debug!("Connecting to graph at {} (db {})", uri, db_name);

        let config = ConfigBuilder::default()
            .uri(uri.as_str())
            .user(connection_args.user.as_deref().unwrap_or(NEO4J_DEFAULT_USER))
            .password(
                connection_args
                    .password
                    .as_deref()
                    .unwrap_or(NEO4J_DEFAULT_PASSWORD),
            )
            .db(db_name.as_str())
            .build()?;

        let graph = Graph::connect(config).await?;
        Ok(Self { graph, uri })
    }
}

#[async_trait]
impl GraphClient for Neo4jClient {
    async fn query(&self, cypher: &str) -> GraphResult<Vec<GraphRow>> {
        debug!("Running cypher against {}: {}", self.uri, cypher);
        let mut stream = self.graph.execute(query(cypher)).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            let value: GraphRow = row
                .to()
                .map_err(|e| GraphError::Decode(e.to_string()))?;
            rows.push(value);
        }
        Ok(rows)
    }

    async fn is_connected(&self) -> bool {
        match self.graph.run(query("RETURN 1")).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Graph at {} is not reachable: {}", self.uri, e);
                false
            }
        }
    }
}

/// Opens a fresh Bolt connection per request
#[derive(Debug, Clone, Default)]
pub struct Neo4jConnector;

#[async_trait]
impl GraphConnector for Neo4jConnector {
    async fn connect(&self, connection_args: &DbConnectionArgs) -> GraphResult<std::sync::Arc<dyn GraphClient>> {
        let client = Neo4jClient::connect(connection_args).await?;
        Ok(std::sync::Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_name_from_args_wins() {
        let args = DbConnectionArgs {
            db_name: Some("biocypher".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_db_name(&args), "biocypher");
    }

    #[test]
    fn test_db_name_falls_back_to_env_then_default() {
        let _env = crate::config::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let empty = DbConnectionArgs {
            db_name: Some(String::new()),
            ..Default::default()
        };

        std::env::set_var(ENV_KG_DB, "proteins");
        assert_eq!(resolve_db_name(&DbConnectionArgs::default()), "proteins");
        assert_eq!(resolve_db_name(&empty), "proteins");

        std::env::remove_var(ENV_KG_DB);
        assert_eq!(resolve_db_name(&DbConnectionArgs::default()), NEO4J_DEFAULT_DB);
        assert_eq!(resolve_db_name(&empty), NEO4J_DEFAULT_DB);
    }
}
