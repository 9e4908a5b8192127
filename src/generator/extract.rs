use std::sync::LazyLock;

use regex::Regex;
use sqlparser::{
    dialect::GenericDialect,
    tokenizer::{Token, Tokenizer}
};

/// First fenced block, with or without a language tag
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fence pattern")
});

/// Line that starts a SQL statement; prose before it is discarded
static STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(SELECT|WITH|INSERT|UPDATE|DELETE|MERGE|CREATE|ALTER|DROP|TRUNCATE|GRANT|REVOKE|CALL|EXECUTE)\b"
    )
    .expect("valid statement pattern")
});

/// Line that may follow a blank line inside a statement
static CONTINUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^[ \t]*(?:(?:SELECT|WITH|INSERT|UPDATE|DELETE|MERGE|CREATE|ALTER|DROP|TRUNCATE|GRANT|REVOKE|CALL|EXECUTE|FROM|WHERE|JOIN|INNER|LEFT|RIGHT|FULL|CROSS|NATURAL|ON|USING|AND|OR|GROUP|ORDER|HAVING|LIMIT|OFFSET|FETCH|UNION|INTERSECT|EXCEPT|WINDOW|QUALIFY|CASE|WHEN|THEN|ELSE|END)\b|[(),;*]|--|/\*)"
    )
    .expect("valid continuation pattern")
});

/// Strip non-SQL wrapping from a model reply.
///
/// Returns `None` when nothing usable is left. Statements of any kind are
/// kept so that the guardrails, not the extractor, decide what may run.
pub fn extract_sql(reply: &str) -> Option<String> {
    let fenced = FENCED_BLOCK
        .captures(reply)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str());
    fenced
        .and_then(statement_from)
        .or_else(|| statement_from(&reply.replace("```", " ")))
}

fn statement_from(body: &str) -> Option<String> {
    let start = STATEMENT_START.find(body)?.start();
    let sql = until_terminator(until_prose_paragraph(&body[start..])).trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

/// Cut before the first blank line that is followed by prose
fn until_prose_paragraph(sql: &str) -> &str {
    let mut offset = 0;
    let mut blank_at = None;
    for line in sql.split_inclusive('\n') {
        if line.trim().is_empty() {
            blank_at.get_or_insert(offset);
        } else if let Some(at) = blank_at.take()
            && !CONTINUATION.is_match(line)
        {
            return &sql[..at];
        }
        offset += line.len();
    }
    sql
}

/// Cut after the first `;` outside strings and comments when prose follows.
///
/// A further statement after the terminator is kept so the guardrails see
/// it. A `;` is a terminator when the text up to it tokenizes and ends with
/// that token.
fn until_terminator(sql: &str) -> &str {
    let dialect = GenericDialect {};
    for (at, _) in sql.match_indices(';') {
        let prefix = &sql[..=at];
        let Ok(tokens) = Tokenizer::new(&dialect, prefix).tokenize() else {
            continue;
        };
        let last = tokens.iter().rev().find(|t| **t != Token::EOF);
        if last != Some(&Token::SemiColon) {
            continue;
        }
        let rest = sql[at + 1..].trim_start();
        return if rest.is_empty() || CONTINUATION.is_match(rest) { sql } else { prefix };
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sql_is_trimmed() {
        assert_eq!(
            extract_sql("  SELECT * FROM products\n").as_deref(),
            Some("SELECT * FROM products")
        );
    }

    #[test]
    fn fenced_block_with_language_tag() {
        let reply = "Here you go:\n```sql\nSELECT name FROM products;\n```\nHope it helps!";
        assert_eq!(
            extract_sql(reply).as_deref(),
            Some("SELECT name FROM products;")
        );
    }

    #[test]
    fn fenced_block_without_language_tag() {
        assert_eq!(
            extract_sql("```\nSELECT 1\n```").as_deref(),
            Some("SELECT 1")
        );
    }

    #[test]
    fn unterminated_fence() {
        assert_eq!(
            extract_sql("```sql\nSELECT id FROM orders").as_deref(),
            Some("SELECT id FROM orders")
        );
    }

    #[test]
    fn leading_prose_is_dropped() {
        let reply = "The query you need is:\nselect count(*) from orders";
        assert_eq!(
            extract_sql(reply).as_deref(),
            Some("select count(*) from orders")
        );
    }

    #[test]
    fn non_select_statements_are_kept_for_the_validator() {
        assert_eq!(
            extract_sql("DROP TABLE products").as_deref(),
            Some("DROP TABLE products")
        );
    }

    #[test]
    fn single_line_fence() {
        assert_eq!(
            extract_sql("```SELECT 1```").as_deref(),
            Some("SELECT 1")
        );
    }

    #[test]
    fn prose_only_reply_yields_nothing() {
        assert!(extract_sql("I cannot answer that question.").is_none());
        assert!(extract_sql("   ").is_none());
        assert!(extract_sql("```sql\n```").is_none());
    }

    #[test]
    fn trailing_prose_after_blank_line_is_dropped() {
        assert_eq!(
            extract_sql("SELECT name FROM products\n\nThis query lists every product name.")
                .as_deref(),
            Some("SELECT name FROM products")
        );
    }

    #[test]
    fn prose_around_terminated_statement() {
        let reply = "Here is the query:\nSELECT * FROM orders WHERE note = 'a;b';\n\
                     It returns each order, doesn't it?";
        assert_eq!(
            extract_sql(reply).as_deref(),
            Some("SELECT * FROM orders WHERE note = 'a;b';")
        );
    }

    #[test]
    fn prose_on_the_same_line_after_terminator() {
        assert_eq!(
            extract_sql("SELECT 1; that's all").as_deref(),
            Some("SELECT 1;")
        );
    }

    #[test]
    fn multi_paragraph_statement_is_kept() {
        let reply = "SELECT name\nFROM products\n\nWHERE price > 10\n\nORDER BY name";
        assert_eq!(extract_sql(reply).as_deref(), Some(reply));
    }

    #[test]
    fn stacked_statement_reaches_the_validator() {
        assert_eq!(
            extract_sql("SELECT 1; DROP TABLE orders").as_deref(),
            Some("SELECT 1; DROP TABLE orders")
        );
        assert_eq!(
            extract_sql("SELECT 1;\n\nDROP TABLE orders\n\nDone.").as_deref(),
            Some("SELECT 1;\n\nDROP TABLE orders")
        );
    }
}
