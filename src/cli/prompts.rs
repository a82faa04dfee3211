use anyhow::{anyhow, Result};
use clap::Args;
use std::path::PathBuf;

use crate::config::{load_prompts, Config};

/// Print the prompts loaded from the prompts file
#[derive(Debug, Args)]
pub struct PromptsCommand {
    /// Prompts file to read instead of the configured one
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
}

impl PromptsCommand {
    pub fn execute(&self, config: &Config) -> Result<()> {
        let path = self.file.as_ref().unwrap_or(&config.prompts_file);
        let prompts = load_prompts(path)
            .ok_or_else(|| anyhow!("Could not load prompts from {}", path.display()))?;
        print!("{}", serde_yaml::to_string(&prompts)?);
        Ok(())
    }
}
