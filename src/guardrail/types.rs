//! Verdict types produced by the guardrail validator.
//!
//! - [`Verdict`] - SAFE / UNSAFE classification of one candidate
//! - [`Rejection`] - why a candidate was classified UNSAFE
//! - [`RejectionKind`] - which guardrail check produced the rejection

use serde::Serialize;

/// Guardrail check that rejected a candidate.
///
/// Variants are listed in scan order: the validator reports the first
/// failing check only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Input contains no statement at all
    EmptyStatement,
    /// Tokenizer or parser could not read the input
    Unparseable,
    /// Leading keyword is not `SELECT`
    NotSelect,
    /// More than one statement separated by `;`
    StackedStatements,
    /// A forbidden operation keyword appears as a standalone token
    ForbiddenKeyword,
    /// A referenced table is outside the whitelist
    TableNotAllowed
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyStatement => write!(f, "empty statement"),
            Self::Unparseable => write!(f, "unparseable"),
            Self::NotSelect => write!(f, "not a SELECT"),
            Self::StackedStatements => write!(f, "stacked statements"),
            Self::ForbiddenKeyword => write!(f, "forbidden keyword"),
            Self::TableNotAllowed => write!(f, "table not allowed")
        }
    }
}

/// Reason attached to an UNSAFE verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub kind:   RejectionKind,
    pub reason: String
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into()
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Classification of a candidate query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Safe,
    Unsafe(Rejection)
}

impl Verdict {
    pub fn unsafe_because(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self::Unsafe(Rejection::new(kind, reason))
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Safe => None,
            Self::Unsafe(rejection) => Some(rejection)
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.rejection().map(|r| r.reason.as_str())
    }
}
