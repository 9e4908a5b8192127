//! # NL2SQL Guard Library
//!
//! Guarded natural-language to SQL workflow: generate a query with a
//! language model, check it against read-only guardrails, run it on the
//! warehouse and repair it from error feedback a bounded number of times.
//!
//! - [`guardrail`] - pure SAFE/UNSAFE validation of candidate SQL
//! - [`generator`] - prompt assembly and SQL extraction around an LLM
//! - [`workflow`] - the orchestrator state machine
//! - [`schema`] / [`warehouse`] - schema snapshots and query execution
//! - [`llm`] - OpenAI, Anthropic and Ollama completion clients

pub mod app;
pub mod cli;
pub mod config;
pub mod dialect;
pub mod error;
pub mod generator;
pub mod guardrail;
pub mod llm;
pub mod logging;
pub mod output;
pub mod schema;
pub mod warehouse;
pub mod workflow;
