//! Wire types for the tool protocol.
//!
//! Every message is one JSON object on one line. Requests carry an opaque
//! `id` that the gateway echoes back verbatim; responses carry exactly one of
//! `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation token, round-tripped verbatim.
    pub id: Value,
    /// Tool name (see [`methods`]).
    pub method: String,
    /// Tool-specific named arguments.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Response envelope received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseEnvelope", into = "ResponseEnvelope")]
pub struct Response {
    /// Id of the request this answers.
    pub id: Value,
    /// Success payload or error message, never both.
    pub outcome: Outcome,
}

/// The two mutually exclusive response shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(String),
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn err(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Split into the result payload or the error message.
    pub fn into_result(self) -> Result<Value, String> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(message) => Err(message),
        }
    }
}

/// On-the-wire shape of a response, before the exclusivity check.
#[derive(Serialize, Deserialize)]
struct ResponseEnvelope {
    id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl TryFrom<ResponseEnvelope> for Response {
    type Error = String;

    fn try_from(envelope: ResponseEnvelope) -> Result<Self, Self::Error> {
        let outcome = match (envelope.result, envelope.error) {
            (Some(_), Some(_)) => return Err("response has both result and error".to_string()),
            (Some(result), None) => Outcome::Result(result),
            (None, Some(Value::String(message))) => Outcome::Error(message),
            (None, Some(other)) => Outcome::Error(other.to_string()),
            (None, None) => return Err("response has neither result nor error".to_string()),
        };
        Ok(Self {
            id: envelope.id,
            outcome,
        })
    }
}

impl From<Response> for ResponseEnvelope {
    fn from(response: Response) -> Self {
        match response.outcome {
            Outcome::Result(result) => Self {
                id: response.id,
                result: Some(result),
                error: None,
            },
            Outcome::Error(message) => Self {
                id: response.id,
                result: None,
                error: Some(Value::String(message)),
            },
        }
    }
}

// ============================================================================
// Tool Parameters
// ============================================================================

/// Parameters for `get_table_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTableSchemaParams {
    pub table_names: Vec<String>,
}

/// Parameters for `run_pagila_query` / `execute_sql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSqlParams {
    /// SQL text; `sql` is accepted as an alias.
    #[serde(alias = "sql")]
    pub query: String,
    /// Positional bind parameters (`$1`, `$2`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    /// Per-call row cap override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

/// Parameters for `text_to_sql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToSqlParams {
    pub text: String,
    /// Run the generated SQL (only when the generator is confident).
    #[serde(default)]
    pub execute: bool,
    /// Generator to use; `local` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

// ============================================================================
// Tool Results
// ============================================================================

/// Result of `list_tables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTablesResult {
    pub tables: Vec<String>,
}

/// One column of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRow {
    pub table: String,
    pub column: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Result of `get_table_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTableSchemaResult {
    pub schema_rows: Vec<SchemaRow>,
}

/// Token usage reported by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of `text_to_sql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToSqlResult {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    pub confident: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

// ============================================================================
// Method Names
// ============================================================================

/// Tool method names.
pub mod methods {
    pub const LIST_TABLES: &str = "list_tables";
    pub const GET_TABLE_SCHEMA: &str = "get_table_schema";
    pub const RUN_PAGILA_QUERY: &str = "run_pagila_query";
    pub const EXECUTE_SQL: &str = "execute_sql";
    pub const TEXT_TO_SQL: &str = "text_to_sql";

    /// Every method the gateway answers.
    pub const ALL: &[&str] = &[
        LIST_TABLES,
        GET_TABLE_SCHEMA,
        RUN_PAGILA_QUERY,
        EXECUTE_SQL,
        TEXT_TO_SQL,
    ];
}
