//! Per-session LLM chat with optional knowledge-graph retrieval.
//!
//! A [`session::ChatSession`] wraps one conversation with an LLM provider.
//! When a chat asks for it, the session looks up the schema of a Neo4j
//! knowledge graph, attaches a [`rag::KgRagAgent`], and the agent's query
//! results are injected into the prompt ahead of the user's question.

pub mod cli;
pub mod config;
pub mod graph;
pub mod llm;
pub mod rag;
pub mod session;
pub mod version;
