//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration
};

use async_trait::async_trait;
use nl2sql_guard::{
    config::WorkflowConfig,
    error::{AppResult, execution_error, llm_api_error, schema_load_error},
    generator::SqlGenerator,
    guardrail::GuardrailConfig,
    llm::CompletionService,
    schema::{SchemaProvider, SchemaSnapshot},
    warehouse::{QueryExecutor, QueryOutput, Row},
    workflow::Orchestrator
};
use serde_json::Value;

pub const RETAIL_TABLES: [&str; 4] = ["PRODUCTS", "CUSTOMERS", "ORDERS", "ORDER_ITEMS"];

pub fn retail_guardrails() -> GuardrailConfig {
    GuardrailConfig::with_allowed_tables(RETAIL_TABLES)
}

pub fn retail_schema() -> SchemaSnapshot {
    SchemaSnapshot::from_columns([
        ("PRODUCTS", "PRODUCT_ID", "NUMBER"),
        ("PRODUCTS", "NAME", "TEXT"),
        ("PRODUCTS", "PRICE", "NUMBER"),
        ("CUSTOMERS", "CUSTOMER_ID", "NUMBER"),
        ("CUSTOMERS", "NAME", "TEXT"),
        ("ORDERS", "ORDER_ID", "NUMBER"),
        ("ORDERS", "CUSTOMER_ID", "NUMBER"),
        ("ORDER_ITEMS", "ORDER_ID", "NUMBER"),
        ("ORDER_ITEMS", "PRODUCT_ID", "NUMBER"),
        ("ORDER_ITEMS", "QUANTITY", "NUMBER")
    ])
}

/// One scripted model reply
pub enum Reply {
    Text(&'static str),
    Fail(&'static str),
    Hang
}

/// Completion service that replays scripted replies and records prompts.
///
/// Once the script runs out the last reply is repeated.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Reply>>,
    last:    Mutex<Option<&'static str>>,
    prompts: Mutex<Vec<String>>
}

impl ScriptedCompletion {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last:    Mutex::new(None),
            prompts: Mutex::new(Vec::new())
        })
    }

    pub fn always(sql: &'static str) -> Arc<Self> {
        Self::new([Reply::Text(sql)])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> AppResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => match *self.last.lock().unwrap() {
                Some(text) => Reply::Text(text),
                None => Reply::Fail("script exhausted")
            }
        };
        match reply {
            Reply::Text(text) => {
                *self.last.lock().unwrap() = Some(text);
                Ok(text.to_string())
            }
            Reply::Fail(message) => Err(llm_api_error(message)),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

/// Executor that records every SQL string it receives
pub struct RecordingExecutor {
    failures: Mutex<VecDeque<&'static str>>,
    hang:     bool,
    calls:    Mutex<Vec<String>>
}

impl RecordingExecutor {
    pub fn succeeding() -> Arc<Self> {
        Self::failing_first([])
    }

    /// Fail the first calls with the given messages, then succeed
    pub fn failing_first(errors: impl IntoIterator<Item = &'static str>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(errors.into_iter().collect()),
            hang:     false,
            calls:    Mutex::new(Vec::new())
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            hang:     true,
            calls:    Mutex::new(Vec::new())
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> AppResult<QueryOutput> {
        self.calls.lock().unwrap().push(sql.to_string());
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(message) = self.failures.lock().unwrap().pop_front() {
            return Err(execution_error(message));
        }
        let mut row = Row::new();
        row.insert("NAME".to_string(), Value::from("lamp"));
        Ok(QueryOutput {
            columns:   vec!["NAME".to_string()],
            rows:      vec![row],
            truncated: false
        })
    }
}

/// Schema provider that always fails
pub struct BrokenSchema;

#[async_trait]
impl SchemaProvider for BrokenSchema {
    async fn load_schema(&self) -> AppResult<SchemaSnapshot> {
        Err(schema_load_error("catalog unreachable"))
    }
}

pub fn workflow_config(max_repairs: u32) -> WorkflowConfig {
    WorkflowConfig {
        max_repairs,
        ..Default::default()
    }
}

pub fn orchestrator(
    completion: Arc<ScriptedCompletion>,
    executor: Arc<RecordingExecutor>,
    max_repairs: u32
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(retail_schema()),
        SqlGenerator::new(completion),
        executor,
        retail_guardrails(),
        workflow_config(max_repairs)
    )
}
