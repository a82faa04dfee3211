use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::Config;
use super::{chat::ChatCommand, kg_status::KgStatusCommand, prompts::PromptsCommand, repl::ReplCommand};

/// kgchat - chat with an LLM, optionally grounded in a knowledge graph
#[derive(Parser)]
#[command(
    name = "kgchat",
    version,
    about = "Chat with an LLM, optionally grounded in a knowledge graph",
    long_about = r#"kgchat forwards a conversation to an LLM provider and relays the reply.
With --kg it first looks up the schema of a Neo4j knowledge graph, lets the
model query the graph, and injects the results into the prompt.

Examples:
  kgchat chat "what is TP53?"                         # Plain chat
  kgchat chat --kg --kg-host local "which genes?"     # Chat grounded in a local graph
  kgchat kg-status --host local                       # Check that the graph is reachable"#
)]
pub struct Cli {
    /// Current working directory
    #[arg(short = 'c', long = "cwd", global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a conversation and print the reply
    Chat(ChatCommand),

    /// Check whether a knowledge graph is reachable
    KgStatus(KgStatusCommand),

    /// Chat interactively, keeping the conversation between turns
    Repl(ReplCommand),

    /// Print the prompts loaded from the prompts file
    Prompts(PromptsCommand),
}

impl Cli {
    /// Default tracing filter for this invocation
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "kgchat=debug"
        } else {
            "kgchat=info"
        }
    }

    pub async fn execute(self) -> Result<()> {
        debug!("Debug logging enabled: {}", self.debug);

        if let Some(cwd) = &self.cwd {
            std::env::set_current_dir(cwd)
                .map_err(|e| anyhow::anyhow!("Failed to change directory to {}: {}", cwd.display(), e))?;
            info!("Changed working directory to: {}", cwd.display());
        }

        let config = Config::init().await?;
        debug!("Configuration initialized");

        match self.command {
            Commands::Chat(cmd) => cmd.execute(&config).await,
            Commands::KgStatus(cmd) => cmd.execute().await,
            Commands::Repl(cmd) => cmd.execute(&config).await,
            Commands::Prompts(cmd) => cmd.execute(&config),
        }
    }
}
