//! Schema snapshot of the tables a question may be answered from.
//!
//! A [`SchemaSnapshot`] is loaded once per workflow run by a
//! [`SchemaProvider`] and rendered into the generation prompt with
//! [`SchemaSnapshot::to_summary`].
//!
//! Providers:
//!
//! - [`crate::warehouse::SqliteWarehouse`] - introspects the warehouse itself
//! - [`DdlSchemaProvider`] - parses `CREATE TABLE` statements from a file
//! - [`SchemaSnapshot`] - a fixed snapshot is its own provider
//!
//! # Example
//!
//! ```
//! use nl2sql_guard::{dialect::SqlDialect, schema::SchemaSnapshot};
//!
//! let sql = r#"
//!     CREATE TABLE products (id INT, name VARCHAR(100));
//!     CREATE TABLE orders (id INT, customer_id INT);
//! "#;
//!
//! let schema = SchemaSnapshot::parse_ddl(sql, SqlDialect::Generic).unwrap();
//! assert_eq!(schema.tables.len(), 2);
//!
//! let summary = schema.to_summary();
//! assert!(summary.contains("products(id:INT, name:VARCHAR(100))"));
//! ```

use std::{collections::BTreeMap, fs::read_to_string, path::PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sqlparser::{ast::Statement, parser::Parser};

use crate::{
    dialect::SqlDialect,
    error::{AppResult, schema_load_error, schema_parse_error},
    guardrail::GuardrailConfig
};

/// Table and its ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name:    String,
    pub columns: Vec<ColumnInfo>
}

/// Column name and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name:      String,
    pub data_type: String
}

/// Description of the allowed schema.
///
/// Tables are keyed by upper-cased name in a `BTreeMap` for deterministic
/// iteration order, so the same snapshot always renders the same prompt.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableInfo>
}

impl SchemaSnapshot {
    /// Build a snapshot from `(table, column, type)` rows in column order,
    /// the shape of an `INFORMATION_SCHEMA.COLUMNS` listing.
    pub fn from_columns<I, T, C, D>(rows: I) -> Self
    where
        I: IntoIterator<Item = (T, C, D)>,
        T: Into<String>,
        C: Into<String>,
        D: Into<String>
    {
        let mut snapshot = Self::default();
        for (table, column, data_type) in rows {
            snapshot.push_column(table.into(), column.into(), data_type.into());
        }
        snapshot
    }

    /// Parse `CREATE TABLE` statements; other statements are ignored.
    ///
    /// # Errors
    ///
    /// Returns a schema parse error if the DDL cannot be parsed
    pub fn parse_ddl(sql: &str, dialect: SqlDialect) -> AppResult<Self> {
        let parser_dialect = dialect.into_parser_dialect();
        let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
            .map_err(|e| schema_parse_error(e.to_string()))?;
        let mut snapshot = Self::default();
        for stmt in statements {
            if let Statement::CreateTable(create) = stmt {
                let name = create.name.to_string();
                let columns = create
                    .columns
                    .into_iter()
                    .map(|column| ColumnInfo {
                        name:      column.name.to_string(),
                        data_type: column.data_type.to_string()
                    })
                    .collect();
                snapshot.tables.insert(name.to_uppercase(), TableInfo {
                    name,
                    columns
                });
            }
        }
        Ok(snapshot)
    }

    fn push_column(&mut self, table: String, column: String, data_type: String) {
        self.tables
            .entry(table.to_uppercase())
            .or_insert_with(|| TableInfo {
                name:    table,
                columns: Vec::new()
            })
            .columns
            .push(ColumnInfo {
                name: column,
                data_type
            });
    }

    /// Drop tables outside the guardrail whitelist
    pub fn retain_allowed(&mut self, guardrails: &GuardrailConfig) {
        self.tables.retain(|_, table| guardrails.is_allowed(&table.name));
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Render one `TABLE(column:TYPE, ...)` line per table
    pub fn to_summary(&self) -> String {
        self.tables
            .values()
            .map(|table| {
                let columns: Vec<String> = table
                    .columns
                    .iter()
                    .map(|c| format!("{}:{}", c.name, c.data_type))
                    .collect();
                format!("{}({})", table.name, columns.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Source of the schema snapshot for a workflow run.
///
/// Failures are fatal for the run: the workflow never starts generating
/// without a schema.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn load_schema(&self) -> AppResult<SchemaSnapshot>;
}

#[async_trait]
impl SchemaProvider for SchemaSnapshot {
    async fn load_schema(&self) -> AppResult<SchemaSnapshot> {
        Ok(self.clone())
    }
}

/// Loads the snapshot from a DDL file on every call.
#[derive(Debug, Clone)]
pub struct DdlSchemaProvider {
    path:       PathBuf,
    dialect:    SqlDialect,
    guardrails: Option<GuardrailConfig>
}

impl DdlSchemaProvider {
    pub fn new(path: impl Into<PathBuf>, dialect: SqlDialect) -> Self {
        Self {
            path: path.into(),
            dialect,
            guardrails: None
        }
    }

    /// Only expose whitelisted tables
    pub fn restricted_to(mut self, guardrails: GuardrailConfig) -> Self {
        self.guardrails = Some(guardrails);
        self
    }
}

#[async_trait]
impl SchemaProvider for DdlSchemaProvider {
    async fn load_schema(&self) -> AppResult<SchemaSnapshot> {
        let ddl = read_to_string(&self.path).map_err(|e| {
            schema_load_error(format!(
                "cannot read DDL file '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        let mut snapshot = SchemaSnapshot::parse_ddl(&ddl, self.dialect)?;
        if let Some(guardrails) = &self.guardrails {
            snapshot.retain_allowed(guardrails);
        }
        if snapshot.is_empty() {
            return Err(schema_load_error(format!(
                "no usable tables in '{}'",
                self.path.display()
            )));
        }
        Ok(snapshot)
    }
}
