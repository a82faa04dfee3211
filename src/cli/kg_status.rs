use anyhow::{anyhow, Result};
use clap::Args;
use tracing::debug;

use crate::config::DbConnectionArgs;
use crate::graph::Neo4jConnector;
use crate::rag::get_kg_connection_status;

/// Check whether a knowledge graph is reachable
#[derive(Debug, Args)]
pub struct KgStatusCommand {
    /// Graph host; "local" resolves to $KGHOST or localhost
    #[arg(long = "host", default_value = "local")]
    pub host: String,

    /// Graph Bolt port
    #[arg(long = "port")]
    pub port: Option<String>,

    /// Graph database name
    #[arg(long = "db")]
    pub db: Option<String>,

    /// Graph user
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Graph password
    #[arg(long = "password")]
    pub password: Option<String>,
}

impl KgStatusCommand {
    pub async fn execute(&self) -> Result<()> {
        let args = DbConnectionArgs {
            host: Some(self.host.clone()),
            port: self.port.clone(),
            db_name: self.db.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        };
        debug!("Checking graph status for {:?}", args);

        if get_kg_connection_status(&Neo4jConnector, Some(args)).await {
            println!("connected");
            Ok(())
        } else {
            Err(anyhow!("knowledge graph is not reachable"))
        }
    }
}
