use serde::Serialize;

use crate::schema::SchemaSnapshot;

/// Which step rejected the previous candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Validation,
    Execution
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "rejected by the SQL guardrails"),
            Self::Execution => write!(f, "failed in the warehouse")
        }
    }
}

/// Failure of the previous attempt, fed back to the model for self-repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairContext {
    pub stage:        FailureStage,
    pub previous_sql: Option<String>,
    pub reason:       String
}

impl RepairContext {
    pub fn validation(previous_sql: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Validation,
            previous_sql,
            reason: reason.into()
        }
    }

    pub fn execution(previous_sql: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: FailureStage::Execution,
            previous_sql,
            reason: reason.into()
        }
    }
}

/// Assemble the generation prompt.
///
/// Output depends only on the arguments.
pub fn build_prompt(
    user_query: &str,
    schema: &SchemaSnapshot,
    prior_error: Option<&RepairContext>
) -> String {
    let mut prompt = format!(
        "You are a SQL expert. Generate a single read-only SELECT query (no comments) \
         that answers the user question.\n\
         Use only these tables/columns:\n{schema}\n\n\
         User question: {question}\n",
        schema = schema.to_summary(),
        question = user_query.trim()
    );

    if let Some(context) = prior_error {
        prompt.push_str(&format!(
            "\nYour previous attempt was {stage}.\n",
            stage = context.stage
        ));
        if let Some(sql) = &context.previous_sql {
            prompt.push_str(&format!("Previous SQL:\n{}\n", sql.trim()));
        }
        prompt.push_str(&format!(
            "Error: {}\n\
             Return a corrected SELECT-only query that uses only the allowed tables.\n",
            context.reason.trim()
        ));
    }

    prompt.push_str("Return ONLY the SQL.");
    prompt
}
