use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{load_prompts, Config, DbConnectionArgs, KgConfig, ModelConfig};
use crate::llm::Message;
use crate::session::{ChatSession, SessionBackend};

/// Send a conversation and print the reply
#[derive(Args)]
pub struct ChatCommand {
    /// The prompt to send. If not provided, will read from stdin
    pub prompt: Vec<String>,

    /// JSON file holding earlier [{"role": .., "content": ..}] messages
    #[arg(long = "messages")]
    pub messages_file: Option<PathBuf>,

    /// System message placed at the start of the conversation
    #[arg(short = 's', long = "system")]
    pub system: Option<String>,

    /// Model to use for this session
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Session id to tag provider requests with
    #[arg(long = "session-id")]
    pub session_id: Option<String>,

    /// Ground the reply in a knowledge graph
    #[arg(long = "kg")]
    pub kg: bool,

    /// Graph host; "local" resolves to $KGHOST or localhost
    #[arg(long = "kg-host")]
    pub kg_host: Option<String>,

    /// Graph Bolt port
    #[arg(long = "kg-port")]
    pub kg_port: Option<String>,

    /// Graph database name
    #[arg(long = "kg-db")]
    pub kg_db: Option<String>,

    /// Graph user
    #[arg(long = "kg-user")]
    pub kg_user: Option<String>,

    /// Graph password
    #[arg(long = "kg-password")]
    pub kg_password: Option<String>,

    /// Number of graph results to inject
    #[arg(short = 'n', long = "results")]
    pub results: Option<usize>,

    /// Print the injected knowledge-graph context after the reply
    #[arg(long = "show-context")]
    pub show_context: bool,

    /// Print the reply as JSON
    #[arg(long = "json")]
    pub json: bool,
}

impl ChatCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        debug!("Executing chat command");

        config.validate()?;

        let messages = self.collect_messages()?;
        info!("Chatting with {} message(s)", messages.len());

        let rag_agent_prompts = load_prompts(&config.prompts_file)
            .map(|prompts| prompts.rag_agent_prompts)
            .filter(|prompts| !prompts.is_empty());

        let model_config = ModelConfig {
            model_name: self.model.clone().unwrap_or_else(|| config.model.clone()),
            ..config.model_config()
        };

        let mut session = ChatSession::new(
            self.session_id.clone(),
            Some(model_config),
            rag_agent_prompts,
            SessionBackend::from_config(config),
        );

        let kg_config = self.kg_config();
        let reply = session
            .chat(&messages, self.kg, kg_config.as_ref())
            .await?
            .ok_or_else(|| anyhow!("No reply: check that an API key is configured"))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            return Ok(());
        }

        println!("{}", reply.message);
        if self.show_context && !reply.injected_context.is_empty() {
            println!("\n--- knowledge graph context ---");
            for snippet in &reply.injected_context {
                println!("{}", snippet);
            }
        }

        Ok(())
    }

    fn kg_config(&self) -> Option<KgConfig> {
        if !self.kg {
            return None;
        }
        let connection_args = DbConnectionArgs {
            host: Some(self.kg_host.clone().unwrap_or_else(|| "local".to_string())),
            port: self.kg_port.clone(),
            db_name: self.kg_db.clone(),
            user: self.kg_user.clone(),
            password: self.kg_password.clone(),
        };
        Some(KgConfig {
            result_num: self.results,
            ..KgConfig::new(connection_args)
        })
    }

    fn collect_messages(&self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();

        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }

        if let Some(path) = &self.messages_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let history: Vec<Message> = serde_json::from_str(&content)
                .with_context(|| format!("Invalid messages in {}", path.display()))?;
            messages.extend(history);
        }

        if !self.prompt.is_empty() || self.messages_file.is_none() {
            let prompt = self.get_prompt()?;
            if prompt.trim().is_empty() {
                return Err(anyhow!("No prompt provided. Use arguments or pipe input via stdin."));
            }
            messages.push(Message::user(prompt));
        }

        if messages.is_empty() {
            return Err(anyhow!("No messages to send"));
        }

        Ok(messages)
    }

    fn get_prompt(&self) -> Result<String> {
        if !self.prompt.is_empty() {
            Ok(self.prompt.join(" "))
        } else {
            debug!("Reading prompt from stdin");
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)
                .map_err(|e| anyhow!("Failed to read from stdin: {}", e))?;
            Ok(buffer)
        }
    }
}
