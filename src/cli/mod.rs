mod root;
mod chat;
mod kg_status;
mod prompts;
mod repl;

pub use root::Cli;
