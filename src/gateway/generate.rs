//! Natural-language to SQL generators.
//!
//! The gateway treats translation as opaque: a [`SqlGenerator`] turns a
//! question into SQL, positional bind params and a confidence flag. The
//! built-in [`LocalGenerator`] is a small pattern matcher over the sample
//! schema so the `text_to_sql` tool works without a model provider.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::transport::protocol::Usage;

/// Name of the built-in provider.
pub const LOCAL_PROVIDER: &str = "local";

/// Errors from a generator.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("{0}")]
    Provider(String),
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub sql: String,
    pub params: Vec<Value>,
    /// Whether the SQL may run without review.
    pub confident: bool,
    pub note: Option<String>,
    pub usage: Option<Usage>,
}

/// Turns a question into SQL.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Provider name used in the `provider` param.
    fn name(&self) -> &str;

    async fn generate(&self, text: &str) -> Result<Generated, GenerateError>;
}

// ============================================================================
// Local Pattern Generator
// ============================================================================

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z_]+").unwrap());
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());
static LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:limit|top|first)\s+(\d+)\b").unwrap());
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"'([^']+)'|"([^"]+)""#).unwrap());

/// What the local generator knows about one table.
struct TableShape {
    table: &'static str,
    nouns: &'static [&'static str],
    columns: &'static [&'static str],
    default_columns: &'static [&'static str],
    /// Column searched by a quoted substring.
    match_column: &'static str,
    year_column: Option<&'static str>,
}

const TABLES: &[TableShape] = &[
    TableShape {
        table: "film",
        nouns: &["film", "films", "movie", "movies", "title", "titles"],
        columns: &[
            "title",
            "description",
            "release_year",
            "rental_duration",
            "rental_rate",
            "length",
            "replacement_cost",
            "rating",
        ],
        default_columns: &["title"],
        match_column: "title",
        year_column: Some("release_year"),
    },
    TableShape {
        table: "actor",
        nouns: &["actor", "actors"],
        columns: &["first_name", "last_name"],
        default_columns: &["first_name", "last_name"],
        match_column: "last_name",
        year_column: None,
    },
    TableShape {
        table: "customer",
        nouns: &["customer", "customers"],
        columns: &["first_name", "last_name", "email", "active"],
        default_columns: &["first_name", "last_name", "email"],
        match_column: "last_name",
        year_column: None,
    },
    TableShape {
        table: "category",
        nouns: &["category", "categories", "genre", "genres"],
        columns: &["name"],
        default_columns: &["name"],
        match_column: "name",
        year_column: None,
    },
];

/// Pattern-based generator over the sample rental schema.
///
/// Understands:
/// - a table noun (`films`, `movies`, `actors`, ...)
/// - named columns (`title and rental_rate`, `rental rate`)
/// - a four-digit year (`from 2006`) on tables with a release year
/// - a quoted substring (`contain 'love'`) matched with `ILIKE`
/// - `limit N` / `top N` / `first N`
///
/// Literals are always bound as params, never spliced into the SQL.
#[derive(Debug, Default, Clone)]
pub struct LocalGenerator;

impl LocalGenerator {
    pub fn new() -> Self {
        Self
    }

    fn translate(&self, text: &str) -> Generated {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();

        let named = words
            .iter()
            .find_map(|word| TABLES.iter().find(|shape| shape.nouns.contains(word)));
        let shape = named.unwrap_or(&TABLES[0]);

        let mut columns = named_columns(shape, &words);
        if columns.is_empty() {
            columns = shape.default_columns.to_vec();
        }

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        let mut notes = Vec::new();

        if named.is_none() {
            notes.push(format!("no known table in the question; assumed {}", shape.table));
        }

        if let Some(year) = YEAR.captures(&lowered).and_then(|c| c[1].parse::<i64>().ok()) {
            match shape.year_column {
                Some(column) => {
                    params.push(Value::from(year));
                    conditions.push(format!("{column} = ${}", params.len()));
                }
                None => notes.push(format!("{} has no year column; ignored {year}", shape.table)),
            }
        }

        if let Some(captures) = QUOTED.captures(text) {
            if let Some(needle) = captures.get(1).or_else(|| captures.get(2)) {
                params.push(Value::String(format!("%{}%", needle.as_str())));
                conditions.push(format!("{} ILIKE ${}", shape.match_column, params.len()));
            }
        }

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), shape.table);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some(limit) = LIMIT.captures(&lowered).and_then(|c| c[1].parse::<u64>().ok()) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        Generated {
            sql,
            params,
            confident: notes.is_empty(),
            note: (!notes.is_empty()).then(|| notes.join("; ")),
            usage: None,
        }
    }
}

/// Columns of `shape` mentioned in the question, in order of mention.
///
/// Matches single words (`title`, `titles`) and adjacent word pairs
/// (`rental rate` for `rental_rate`).
fn named_columns(shape: &TableShape, words: &[&str]) -> Vec<&'static str> {
    let mut found = Vec::new();
    let mut push = |candidate: &str| {
        let hit = shape.columns.iter().find(|column| {
            candidate == **column || candidate.strip_suffix('s') == Some(**column)
        });
        if let Some(column) = hit {
            if !found.contains(column) {
                found.push(*column);
            }
        }
    };

    for (i, word) in words.iter().enumerate() {
        push(*word);
        if let Some(next) = words.get(i + 1) {
            push(format!("{word}_{next}").as_str());
        }
    }
    found
}

#[async_trait]
impl SqlGenerator for LocalGenerator {
    fn name(&self) -> &str {
        LOCAL_PROVIDER
    }

    async fn generate(&self, text: &str) -> Result<Generated, GenerateError> {
        if text.trim().is_empty() {
            return Err(GenerateError::EmptyQuestion);
        }
        let generated = self.translate(text);
        tracing::debug!(sql = %generated.sql, confident = generated.confident, "local generation");
        Ok(generated)
    }
}
