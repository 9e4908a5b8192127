//! Warehouse execution of validated queries.
//!
//! [`QueryExecutor`] is the capability the workflow calls once a candidate
//! has a SAFE verdict. Executors must refuse anything that is not a single
//! `SELECT` on their own as well; [`crate::guardrail::ensure_read_only`] is
//! the shared gate for that.

mod sqlite;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
pub use sqlite::SqliteWarehouse;

use crate::error::AppResult;

/// One result row, columns in select-list order
pub type Row = IndexMap<String, serde_json::Value>;

/// Rows returned by a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub columns:   Vec<String>,
    pub rows:      Vec<Row>,
    /// More rows were available than the executor's row limit
    pub truncated: bool
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Runs read-only SQL against the warehouse.
///
/// Errors carry the warehouse's message; the workflow feeds it back to the
/// generator as repair context.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> AppResult<QueryOutput>;
}
