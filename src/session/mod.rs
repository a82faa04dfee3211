//! Session management and conversation handling
//!
//! A session owns one conversation with the configured LLM provider and,
//! on request, a knowledge-graph retrieval agent attached to it.

mod session;
mod conversation;
mod store;

pub use session::*;
pub use conversation::*;
pub use store::*;

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Outcome codes reported when attaching a knowledge graph
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("invalid input")]
    InvalidInput,

    #[error("not found")]
    NotFound,

    #[error("unknown error")]
    UnknownError,
}
