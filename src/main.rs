use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kgchat::{cli::Cli, version};

#[tokio::main]
async fn main() {
    // Load environment variables from .env before anything reads them
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = dotenv {
        tracing::debug!("No .env file found or error loading it: {}", e);
    }

    tracing::debug!("Starting {}", version::full_version());

    if let Err(e) = cli.execute().await {
        error!("Application error: {}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    // --debug wins over RUST_LOG
    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new(cli.log_directive())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| cli.log_directive().into())
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}
