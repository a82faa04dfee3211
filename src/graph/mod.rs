//! Knowledge-graph access
//!
//! A thin query interface over the graph database plus the lookup of the
//! schema-info node that describes what the graph contains.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::config::DbConnectionArgs;

mod neo4j;

pub use neo4j::*;

/// Query that locates the node carrying the graph's schema description
pub const SCHEMA_INFO_QUERY: &str = "MATCH (n:Schema_info) RETURN n LIMIT 1";

/// Property on the schema-info node holding the JSON schema
pub const SCHEMA_INFO_PROPERTY: &str = "schema_info";

/// One result row, keyed by the names in the query's RETURN clause
pub type GraphRow = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("graph driver error: {0}")]
    Driver(#[from] neo4rs::Error),

    #[error("failed to decode graph row: {0}")]
    Decode(String),

    #[error("invalid schema info: {0}")]
    SchemaParse(#[from] serde_json::Error),

    #[error("query failed: {0}")]
    Query(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Query interface over a connected graph
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn query(&self, cypher: &str) -> GraphResult<Vec<GraphRow>>;

    async fn is_connected(&self) -> bool;
}

/// Opens graph clients from connection arguments
#[async_trait]
pub trait GraphConnector: Send + Sync {
    async fn connect(&self, connection_args: &DbConnectionArgs) -> GraphResult<Arc<dyn GraphClient>>;
}

/// Read a property off a returned node, whether the driver flattened it
/// into a property map or kept a `properties` wrapper.
fn node_property<'a>(node: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    node.get(key)
        .or_else(|| node.get("properties").and_then(|props| props.get(key)))
}

/// Extract the schema dictionary from the rows of [`SCHEMA_INFO_QUERY`].
pub fn parse_schema_info(rows: &[GraphRow]) -> GraphResult<Option<serde_json::Value>> {
    let Some(node) = rows.first().and_then(|row| row.get("n")) else {
        return Ok(None);
    };

    match node_property(node, SCHEMA_INFO_PROPERTY) {
        Some(serde_json::Value::String(raw)) => Ok(Some(serde_json::from_str(raw)?)),
        Some(other) if other.is_object() => Ok(Some(other.clone())),
        _ => Ok(None),
    }
}

async fn query_schema_info(
    connector: &dyn GraphConnector,
    connection_args: &DbConnectionArgs,
) -> GraphResult<Option<serde_json::Value>> {
    let client = connector.connect(connection_args).await?;
    let rows = client.query(SCHEMA_INFO_QUERY).await?;
    parse_schema_info(&rows)
}

/// Look for a schema info node in the connected graph and load the schema
/// info if present. Failures are logged and reported as `None`.
pub async fn find_schema_info_node(
    connector: &dyn GraphConnector,
    connection_args: &DbConnectionArgs,
) -> Option<serde_json::Value> {
    match query_schema_info(connector, connection_args).await {
        Ok(Some(schema)) => {
            info!("Found schema info at {}", connection_args.bolt_uri());
            Some(schema)
        }
        Ok(None) => None,
        Err(e) => {
            error!("Schema lookup at {} failed: {}", connection_args.bolt_uri(), e);
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_schema_info_from_string_property() {
        let row = json!({"n": {"schema_info": "{\"protein\": {\"represented_as\": \"node\"}}"}});
        let rows = vec![row.as_object().cloned().unwrap()];
        let schema = parse_schema_info(&rows).unwrap().unwrap();
        assert_eq!(schema["protein"]["represented_as"], "node");
    }

    #[test]
    fn test_parse_schema_info_from_wrapped_properties() {
        let row = json!({"n": {"labels": ["Schema_info"], "properties": {"schema_info": "{}"}}});
        let rows = vec![row.as_object().cloned().unwrap()];
        assert_eq!(parse_schema_info(&rows).unwrap(), Some(json!({})));
    }

    #[test]
    fn test_parse_schema_info_empty_and_invalid() {
        assert_eq!(parse_schema_info(&[]).unwrap(), None);

        let row = json!({"n": {"other": 1}});
        assert_eq!(parse_schema_info(&[row.as_object().cloned().unwrap()]).unwrap(), None);

        let row = json!({"n": {"schema_info": "not json"}});
        assert!(parse_schema_info(&[row.as_object().cloned().unwrap()]).is_err());
    }

    #[tokio::test]
    async fn test_find_schema_info_node() {
        let connector = FakeConnector::new(FakeGraph::with_schema(json!({"gene": {}})));
        let args = DbConnectionArgs::new("localhost", Some("7687".to_string()));

        let schema = find_schema_info_node(&connector, &args).await;
        assert_eq!(schema, Some(json!({"gene": {}})));

        let graph = connector.graph.as_ref().unwrap();
        assert_eq!(graph.queries.lock().unwrap().as_slice(), [SCHEMA_INFO_QUERY.to_string()]);
    }

    #[tokio::test]
    async fn test_find_schema_info_node_failures_yield_none() {
        let args = DbConnectionArgs::new("localhost", None);

        let connector = FakeConnector::unreachable();
        assert_eq!(find_schema_info_node(&connector, &args).await, None);

        let connector = FakeConnector::new(FakeGraph::default());
        assert_eq!(find_schema_info_node(&connector, &args).await, None);
    }
}
