//! Read-only guardrails for generated SQL.
//!
//! [`validate`] classifies a candidate as [`Verdict::Safe`] or
//! [`Verdict::Unsafe`]. It is a pure function of the candidate and the
//! [`GuardrailConfig`]; malformed input is a verdict, never an error.
//!
//! # Checks
//!
//! Checks run in a fixed order and the first failure is reported:
//!
//! | Order | Check | Rejection |
//! |-------|-------|-----------|
//! | 1 | Input tokenizes and is not empty | [`RejectionKind::EmptyStatement`], [`RejectionKind::Unparseable`] |
//! | 2 | Leading keyword is `SELECT`, single statement | [`RejectionKind::NotSelect`], [`RejectionKind::StackedStatements`] |
//! | 3 | No forbidden keyword as a standalone token | [`RejectionKind::ForbiddenKeyword`] |
//! | 4 | Statement parses | [`RejectionKind::Unparseable`] |
//! | 5 | Every `FROM`/`JOIN` table is whitelisted | [`RejectionKind::TableNotAllowed`] |
//!
//! Keyword matching works on tokens, so `CREATED_AT` never matches `CREATE`
//! and `'drop me'` (a string literal) never matches `DROP`.
//!
//! # Example
//!
//! ```
//! use nl2sql_guard::guardrail::{GuardrailConfig, validate};
//!
//! let config = GuardrailConfig::with_allowed_tables(["PRODUCTS", "ORDERS"]);
//!
//! assert!(validate("SELECT created_at FROM products", &config).is_safe());
//! assert!(!validate("DROP TABLE products", &config).is_safe());
//! assert!(!validate("SELECT * FROM employees", &config).is_safe());
//! ```

mod normalize;
mod relations;
mod types;

use std::collections::{BTreeSet, HashSet};

pub use normalize::{NormalizedSql, NormalizedWord, normalize};
pub use relations::{TableRef, referenced_tables};
use sqlparser::{ast::Statement, parser::Parser};
pub use types::{Rejection, RejectionKind, Verdict};

use crate::{
    config::GuardrailsConfig,
    dialect::SqlDialect,
    error::{AppResult, execution_error}
};

/// Operations a read-only query must never contain
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "MERGE", "GRANT", "REVOKE",
    "TRUNCATE", "CALL", "EXECUTE"
];

/// Immutable guardrail settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct GuardrailConfig {
    allowed_tables:     BTreeSet<String>,
    forbidden_keywords: HashSet<String>,
    dialect:            SqlDialect
}

impl GuardrailConfig {
    pub fn new<T, K>(
        allowed_tables: impl IntoIterator<Item = T>,
        forbidden_keywords: impl IntoIterator<Item = K>
    ) -> Self
    where
        T: AsRef<str>,
        K: AsRef<str>
    {
        Self {
            allowed_tables:     allowed_tables
                .into_iter()
                .map(|t| t.as_ref().trim().to_uppercase())
                .collect(),
            forbidden_keywords: forbidden_keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_uppercase())
                .collect(),
            dialect:            SqlDialect::default()
        }
    }

    /// Whitelist with the default forbidden keyword set
    pub fn with_allowed_tables<T: AsRef<str>>(allowed_tables: impl IntoIterator<Item = T>) -> Self {
        Self::new(allowed_tables, DEFAULT_FORBIDDEN_KEYWORDS.iter().copied())
    }

    pub fn from_config(config: &GuardrailsConfig, dialect: SqlDialect) -> Self {
        Self::new(&config.allowed_tables, &config.forbidden_keywords).with_dialect(dialect)
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Case-insensitive whitelist lookup
    pub fn is_allowed(&self, table: &str) -> bool {
        self.allowed_tables.contains(&table.trim().to_uppercase())
    }

    pub fn is_forbidden(&self, word: &str) -> bool {
        self.forbidden_keywords.contains(&word.to_uppercase())
    }

    /// Whitelisted tables, upper-cased and sorted
    pub fn allowed_tables(&self) -> impl Iterator<Item = &str> {
        self.allowed_tables.iter().map(String::as_str)
    }
}

/// Classify a candidate query.
pub fn validate(candidate_sql: &str, config: &GuardrailConfig) -> Verdict {
    let normalized = match normalize::significant_tokens(candidate_sql, config.dialect) {
        Ok(normalized) => normalized,
        Err(message) => {
            return Verdict::unsafe_because(
                RejectionKind::Unparseable,
                normalize::unparseable_reason(&message)
            );
        }
    };

    if let Some(rejection) = check_statement_shape(&normalized) {
        return Verdict::Unsafe(rejection);
    }

    if let Some(rejection) = check_forbidden_keywords(&normalized, config) {
        return Verdict::Unsafe(rejection);
    }

    let statement = match parse_single(candidate_sql, config.dialect) {
        Ok(statement) => statement,
        Err(rejection) => return Verdict::Unsafe(rejection)
    };

    if let Some(rejection) = check_tables(&statement, config) {
        return Verdict::Unsafe(rejection);
    }

    Verdict::Safe
}

/// Refuse anything that is not a single `SELECT` statement.
///
/// Executors call this before touching the warehouse, independently of the
/// workflow's own validation.
///
/// # Errors
///
/// Returns an execution error naming the rejection.
pub fn ensure_read_only(sql: &str, dialect: SqlDialect) -> AppResult<()> {
    let normalized = normalize::significant_tokens(sql, dialect).map_err(|message| {
        execution_error(format!(
            "refusing to execute: {}",
            normalize::unparseable_reason(&message)
        ))
    })?;
    match check_statement_shape(&normalized) {
        Some(rejection) => Err(execution_error(format!(
            "refusing to execute: {}",
            rejection.reason
        ))),
        None => Ok(())
    }
}

fn check_statement_shape(normalized: &NormalizedSql) -> Option<Rejection> {
    let leading = normalized.leading_keyword().filter(|_| !normalized.is_empty());
    let Some(leading) = leading else {
        return Some(Rejection::new(
            RejectionKind::EmptyStatement,
            "empty statement: no SQL to run"
        ));
    };
    if leading != "SELECT" {
        return Some(Rejection::new(
            RejectionKind::NotSelect,
            format!("only SELECT statements are allowed, found '{}'", leading)
        ));
    }
    if normalized.statement_count() > 1 {
        return Some(Rejection::new(
            RejectionKind::StackedStatements,
            format!(
                "exactly one statement is allowed, found {}",
                normalized.statement_count()
            )
        ));
    }
    None
}

fn check_forbidden_keywords(normalized: &NormalizedSql, config: &GuardrailConfig) -> Option<Rejection> {
    normalized
        .words()
        .find(|word| !word.quoted && config.is_forbidden(&word.folded))
        .map(|word| {
            Rejection::new(
                RejectionKind::ForbiddenKeyword,
                format!("forbidden operation '{}' is not allowed", word.folded)
            )
        })
}

fn parse_single(sql: &str, dialect: SqlDialect) -> Result<Statement, Rejection> {
    let parser_dialect = dialect.into_parser_dialect();
    let mut statements = Parser::parse_sql(parser_dialect.as_ref(), sql).map_err(|e| {
        Rejection::new(
            RejectionKind::Unparseable,
            normalize::unparseable_reason(&e.to_string())
        )
    })?;
    if statements.len() != 1 {
        return Err(Rejection::new(
            RejectionKind::StackedStatements,
            format!(
                "exactly one statement is allowed, found {}",
                statements.len()
            )
        ));
    }
    let statement = statements.remove(0);
    if !matches!(statement, Statement::Query(_)) {
        return Err(Rejection::new(
            RejectionKind::NotSelect,
            "only SELECT statements are allowed"
        ));
    }
    Ok(statement)
}

fn check_tables(statement: &Statement, config: &GuardrailConfig) -> Option<Rejection> {
    referenced_tables(statement)
        .into_iter()
        .find(|table| !config.is_allowed(&table.name))
        .map(|table| {
            let allowed: Vec<&str> = config.allowed_tables().collect();
            Rejection::new(
                RejectionKind::TableNotAllowed,
                format!(
                    "table '{}' is not in the allowed list ({})",
                    table.name,
                    allowed.join(", ")
                )
            )
        })
}
