//! Keyword-scan validation for candidate SQL.
//!
//! This is a conservative scan, not a parser. It rejects anything that is
//! not a single `SELECT`/`WITH` statement and anything that mentions a
//! data-definition or data-mutation verb as a whole word, including inside
//! string literals and comments. False rejections are preferred over false
//! acceptances.
//!
//! Known limitation: obfuscated SQL (encoded literals, exotic whitespace,
//! functions with side effects) can get past a keyword scan. The gateway
//! also runs every statement inside a read-only transaction.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Verbs that make a statement non-read-only.
static FORBIDDEN_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(create|alter|drop|insert|update|delete|truncate|grant|revoke)\b").unwrap()
});

/// Accepted statement openers.
static READ_ONLY_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\(*\s*(select|with)\b").unwrap());

/// Why a query was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Nothing but whitespace (or a lone separator).
    EmptyQuery,
    /// More than one non-empty `;`-separated segment.
    MultipleStatements,
    /// A mutating verb, or not a `SELECT`/`WITH` statement.
    ForbiddenOperation,
}

impl RejectReason {
    /// Stable reason code surfaced to callers.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyQuery => "empty_query",
            RejectReason::MultipleStatements => "multiple_statements",
            RejectReason::ForbiddenOperation => "forbidden_operation",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement that passed validation, without its trailing separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    statement: String,
}

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.statement
    }

    pub fn into_inner(self) -> String {
        self.statement
    }
}

/// Classify a candidate SQL string.
///
/// 1. Strip one trailing `;`. More than one non-empty `;`-delimited segment
///    is `multiple_statements`.
/// 2. Any mutating verb anywhere, or an opener other than `SELECT`/`WITH`,
///    is `forbidden_operation`.
pub fn validate(query: &str) -> Result<ValidatedQuery, RejectReason> {
    let trimmed = query.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    let non_empty_segments = body
        .split(';')
        .filter(|segment| !segment.trim().is_empty())
        .count();

    match non_empty_segments {
        0 => return Err(RejectReason::EmptyQuery),
        1 => {}
        _ => return Err(RejectReason::MultipleStatements),
    }

    if FORBIDDEN_VERB.is_match(body) || !READ_ONLY_START.is_match(body) {
        return Err(RejectReason::ForbiddenOperation);
    }

    Ok(ValidatedQuery {
        statement: body.to_string(),
    })
}
