use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::config::{Config, DbConnectionArgs, KgConfig};
use crate::llm::Message;
use crate::session::{SessionBackend, SessionStore};

/// Interactive multi-turn chat on stdin
#[derive(Debug, Args)]
pub struct ReplCommand {
    /// System message placed at the start of the conversation
    #[arg(short = 's', long = "system")]
    pub system: Option<String>,

    /// Ground replies in the knowledge graph at this host ("local" for $KGHOST)
    #[arg(long = "kg-host")]
    pub kg_host: Option<String>,

    /// Graph Bolt port
    #[arg(long = "kg-port")]
    pub kg_port: Option<String>,
}

impl ReplCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        config.validate()?;

        let store = SessionStore::new(SessionBackend::from_config(config));
        let session = store.get_or_create(None, Some(config.model_config())).await;
        let session_id = session.lock().await.session_id().to_string();
        debug!("REPL session {}", session_id);

        let kg_config = self.kg_host.as_ref().map(|host| {
            KgConfig::new(DbConnectionArgs::new(host.clone(), self.kg_port.clone()))
        });

        let mut history: Vec<Message> = self.system.iter().map(|s| Message::system(s.clone())).collect();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            store.prune_expired().await;
            let Some(session) = store.get(&session_id).await else {
                warn!("Session {} expired, starting over", session_id);
                break;
            };

            history.push(Message::user(line));
            let reply = session
                .lock()
                .await
                .chat(&history, kg_config.is_some(), kg_config.as_ref())
                .await;

            match reply {
                Ok(Some(reply)) => {
                    stdout.write_all(format!("{}\n", reply.message).as_bytes()).await?;
                    history.push(Message::assistant(reply.message));
                }
                Ok(None) => {
                    history.pop();
                    stdout.write_all(b"(no reply: is an API key configured?)\n").await?;
                }
                Err(e) => {
                    history.pop();
                    stdout.write_all(format!("error: {}\n", e).as_bytes()).await?;
                }
            }
        }

        store.remove(&session_id).await;
        Ok(())
    }
}
