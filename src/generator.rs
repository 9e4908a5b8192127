//! Natural-language to SQL generation.
//!
//! The generator owns the prompt contract around an external
//! [`CompletionService`]:
//!
//! 1. [`build_prompt`] - deterministic prompt from question, schema and the
//!    optional [`RepairContext`] of the previous attempt
//! 2. [`CompletionService::complete`] - the model call itself
//! 3. [`extract_sql`] - strip code fences and prose from the reply
//!
//! Any failure in these steps is a generation failure. The workflow ends
//! such a run as rejected instead of spending repair budget on it.

mod extract;
mod prompt;

use std::sync::Arc;

pub use extract::extract_sql;
pub use prompt::{FailureStage, RepairContext, build_prompt};
use tracing::debug;

use crate::{
    error::{AppResult, generation_error},
    llm::CompletionService,
    schema::SchemaSnapshot
};

/// Produces one candidate SQL string per call.
#[derive(Clone)]
pub struct SqlGenerator {
    completion: Arc<dyn CompletionService>
}

impl SqlGenerator {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion
        }
    }

    /// Generate a candidate for `user_query`.
    ///
    /// # Errors
    ///
    /// Returns a generation error if the completion call fails or the reply
    /// contains no SQL statement.
    pub async fn generate(
        &self,
        user_query: &str,
        schema: &SchemaSnapshot,
        prior_error: Option<&RepairContext>
    ) -> AppResult<String> {
        let prompt = build_prompt(user_query, schema, prior_error);
        debug!(chars = prompt.len(), repair = prior_error.is_some(), "prompt assembled");
        let reply = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|e| generation_error(format!("completion call failed: {}", e)))?;
        extract_sql(&reply)
            .ok_or_else(|| generation_error("model reply contains no SQL statement"))
    }
}
