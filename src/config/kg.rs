//! Knowledge-graph connection settings and their normalisation

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::{debug, error};

use super::{
    DEFAULT_KG_PORT, ENV_KG_HOST, ENV_KG_PORT, LOCALHOST, RESULT_NUM_DEFAULT,
};

/// Connection arguments for the graph database
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbConnectionArgs {
    pub host: Option<String>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<String>,
    #[serde(default, alias = "db_name")]
    pub db_name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl DbConnectionArgs {
    pub fn new(host: impl Into<String>, port: Option<String>) -> Self {
        Self {
            host: Some(host.into()),
            port,
            ..Default::default()
        }
    }

    /// Bolt URI for these arguments
    pub fn bolt_uri(&self) -> String {
        format!(
            "bolt://{}:{}",
            self.host.as_deref().unwrap_or(LOCALHOST),
            self.port.as_deref().unwrap_or(DEFAULT_KG_PORT)
        )
    }
}

// Keep the password out of logs.
impl fmt::Debug for DbConnectionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnectionArgs")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_name", &self.db_name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Ports arrive as either JSON numbers or strings.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Port>::deserialize(deserializer)?.map(|port| match port {
        Port::Number(n) => n.to_string(),
        Port::Text(s) => s,
    }))
}

/// Knowledge-graph retrieval settings attached to a chat request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KgConfig {
    #[serde(default, alias = "connection_args")]
    pub connection_args: Option<DbConnectionArgs>,
    #[serde(default, alias = "result_num")]
    pub result_num: Option<usize>,
    #[serde(default)]
    pub description: Option<String>,
}

impl KgConfig {
    pub fn new(connection_args: DbConnectionArgs) -> Self {
        Self {
            connection_args: Some(connection_args),
            ..Default::default()
        }
    }

    /// Number of results the retrieval agent should return
    pub fn n_results(&self) -> usize {
        self.result_num.unwrap_or(RESULT_NUM_DEFAULT)
    }
}

/// Resolve `local` hosts and missing ports against the given defaults.
pub fn normalize_connection_args(
    mut connection_args: DbConnectionArgs,
    host_default: Option<String>,
    port_default: Option<String>,
) -> DbConnectionArgs {
    if let Some(host) = &connection_args.host {
        if host.eq_ignore_ascii_case("local") {
            connection_args.host = Some(host_default.unwrap_or_else(|| LOCALHOST.to_string()));
        }
    }

    if connection_args.port.as_deref().map_or(true, str::is_empty) {
        connection_args.port = Some(port_default.unwrap_or_else(|| DEFAULT_KG_PORT.to_string()));
    }

    connection_args
}

/// Normalise connection arguments using `KGHOST` / `KGPORT` from the environment.
pub fn process_connection_args(connection_args: DbConnectionArgs) -> DbConnectionArgs {
    debug!("Processing args: {:?}", connection_args);
    let processed = normalize_connection_args(
        connection_args,
        std::env::var(ENV_KG_HOST).ok(),
        std::env::var(ENV_KG_PORT).ok(),
    );
    debug!("Processing result: {:?}", processed);
    processed
}

/// Normalise the connection arguments inside a KG config.
pub fn process_kg_config(mut kg_config: KgConfig) -> KgConfig {
    debug!("Input kg_config: {:?}", kg_config);
    match kg_config.connection_args.take() {
        Some(args) => {
            kg_config.connection_args = Some(process_connection_args(args));
            debug!("Processing result of kg_config: {:?}", kg_config);
        }
        None => error!("Error during updating of kg_config: missing connection args"),
    }
    kg_config
}
