use sqlparser::tokenizer::{Token, Tokenizer};

use crate::{
    dialect::SqlDialect,
    error::{AppResult, format_sql_error, query_parse_error}
};

/// Token stream of a candidate with whitespace and comments removed.
///
/// Only used for classification; the candidate text itself is never
/// rewritten.
#[derive(Debug, Clone)]
pub struct NormalizedSql {
    tokens:     Vec<Token>,
    statements: usize
}

/// A word token as seen by the keyword scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedWord {
    /// Upper-cased word value
    pub folded: String,
    /// Word was quoted (`"drop"`, `` `drop` ``) and is therefore an identifier
    pub quoted: bool
}

impl NormalizedSql {
    /// Number of non-empty statements separated by `;`
    pub fn statement_count(&self) -> usize {
        self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements == 0
    }

    /// Leading token, case-folded when it is an unquoted word
    pub fn leading_keyword(&self) -> Option<String> {
        self.tokens.first().map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => word.value.to_uppercase(),
            other => other.to_string()
        })
    }

    /// Word tokens in source order. String literals are not words.
    pub fn words(&self) -> impl Iterator<Item = NormalizedWord> + '_ {
        self.tokens.iter().filter_map(|token| match token {
            Token::Word(word) => Some(NormalizedWord {
                folded: word.value.to_uppercase(),
                quoted: word.quote_style.is_some()
            }),
            _ => None
        })
    }
}

/// Tokenize a candidate, dropping whitespace and comments.
///
/// # Errors
///
/// Returns a query parse error when the tokenizer rejects the input
/// (unterminated string literal, unterminated comment, ...).
pub fn normalize(sql: &str, dialect: SqlDialect) -> AppResult<NormalizedSql> {
    significant_tokens(sql, dialect).map_err(query_parse_error)
}

pub(crate) fn significant_tokens(sql: &str, dialect: SqlDialect) -> Result<NormalizedSql, String> {
    let parser_dialect = dialect.into_parser_dialect();
    let raw = Tokenizer::new(parser_dialect.as_ref(), sql)
        .tokenize()
        .map_err(|e| e.to_string())?;

    let mut tokens = Vec::with_capacity(raw.len());
    let mut statements = 0;
    let mut open_statement = false;
    for token in raw {
        match token {
            Token::Whitespace(_) | Token::EOF => {}
            Token::SemiColon => {
                if open_statement {
                    statements += 1;
                    open_statement = false;
                }
                tokens.push(token);
            }
            other => {
                open_statement = true;
                tokens.push(other);
            }
        }
    }
    if open_statement {
        statements += 1;
    }

    Ok(NormalizedSql {
        tokens,
        statements
    })
}

/// Render a tokenizer/parser failure as a one-line verdict reason
pub(crate) fn unparseable_reason(message: &str) -> String {
    format_sql_error("unparseable SQL", message).replace(":\n  ", ": ")
}
