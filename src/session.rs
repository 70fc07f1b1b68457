//! Driver-side session context.
//!
//! A [`Session`] owns everything the driver keeps between interactions: the
//! channel to the gateway (normally a [`Supervisor`]), the semantic cache,
//! and the usage ledger. Nothing lives in globals.
//!
//! # Ask flow
//!
//! ```text
//!   question ──► cache.search ──hit──► execute_sql(cached sql) ──► Answer::Cache
//!                    │
//!                   miss
//!                    ▼
//!        text_to_sql{execute: false} ──not confident──► Answer::NeedsReview
//!                    │
//!                confident
//!                    ▼
//!          execute_sql(sql, params) ──ok──► cache.record_search ──► Answer::Generated
//! ```
//!
//! An entry is only ever recorded after a successful execution.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::cache::SemanticCache;
use crate::gateway::ExecutionResult;
use crate::supervisor::{Supervisor, SupervisorError};
use crate::transport::protocol::{
    methods, GetTableSchemaResult, ListTablesResult, SchemaRow, TextToSqlResult,
};
use crate::transport::Row;
use crate::usage::UsageLedger;

/// Errors surfaced to the driver.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The tool answered with an error.
    #[error("{0}")]
    Tool(String),

    #[error("unexpected {method} result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Something that can invoke a tool and return its result payload.
#[async_trait]
pub trait ToolChannel: Send {
    async fn invoke(&mut self, method: &str, params: Value) -> SessionResult<Value>;
}

#[async_trait]
impl ToolChannel for Supervisor {
    async fn invoke(&mut self, method: &str, params: Value) -> SessionResult<Value> {
        self.call(method, params)
            .await?
            .into_result()
            .map_err(SessionError::Tool)
    }
}

/// Where an answer's SQL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// Reused from the semantic cache; no generation call.
    Cache,
    /// Generated and executed.
    Generated,
    /// Generated but not confident; nothing was executed.
    NeedsReview,
}

/// Answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub source: AnswerSource,
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Explicit driver context.
pub struct Session<C> {
    channel: C,
    cache: Option<SemanticCache>,
    usage: UsageLedger,
}

impl<C: ToolChannel> Session<C> {
    pub fn new(channel: C, cache: Option<SemanticCache>, usage: UsageLedger) -> Self {
        Self {
            channel,
            cache,
            usage,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn cache(&self) -> Option<&SemanticCache> {
        self.cache.as_ref()
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    /// Answer a natural-language question.
    pub async fn ask(&mut self, question: &str) -> SessionResult<Answer> {
        let search = match &self.cache {
            Some(cache) => Some(cache.search(question).await),
            None => None,
        };

        if let Some(hit) = search.as_ref().and_then(|p| p.hit.clone()) {
            let executed = self.run_sql(&hit.sql, &hit.params).await?;
            return Ok(Answer {
                source: AnswerSource::Cache,
                sql: hit.sql,
                params: hit.params,
                rows: executed.rows,
                truncated: executed.truncated,
                note: executed.note,
            });
        }

        let generated = self.text_to_sql(question).await?;
        if !generated.confident {
            tracing::info!(sql = %generated.sql, "generated SQL needs review, not executing");
            return Ok(Answer {
                source: AnswerSource::NeedsReview,
                sql: generated.sql,
                params: generated.params,
                rows: Vec::new(),
                truncated: false,
                note: generated.note,
            });
        }

        let executed = self.run_sql(&generated.sql, &generated.params).await?;

        if let (Some(cache), Some(search)) = (&self.cache, &search) {
            cache.record_search(search, question, &generated.sql, &generated.params);
        }

        Ok(Answer {
            source: AnswerSource::Generated,
            sql: generated.sql,
            params: generated.params,
            rows: executed.rows,
            truncated: executed.truncated,
            note: executed.note,
        })
    }

    /// Run SQL through the gateway's `execute_sql` tool.
    pub async fn run_sql(&mut self, sql: &str, params: &[Value]) -> SessionResult<ExecutionResult> {
        let mut request = json!({ "query": sql });
        if !params.is_empty() {
            request["params"] = Value::Array(params.to_vec());
        }
        self.invoke(methods::EXECUTE_SQL, request).await
    }

    pub async fn list_tables(&mut self) -> SessionResult<Vec<String>> {
        let result: ListTablesResult = self.invoke(methods::LIST_TABLES, json!({})).await?;
        Ok(result.tables)
    }

    pub async fn table_schema(&mut self, table_names: &[String]) -> SessionResult<Vec<SchemaRow>> {
        let result: GetTableSchemaResult = self
            .invoke(methods::GET_TABLE_SCHEMA, json!({ "table_names": table_names }))
            .await?;
        Ok(result.schema_rows)
    }

    /// Generate SQL without running it.
    pub async fn text_to_sql(&mut self, text: &str) -> SessionResult<TextToSqlResult> {
        let generated: TextToSqlResult = self
            .invoke(methods::TEXT_TO_SQL, json!({ "text": text, "execute": false }))
            .await?;
        if let Some(usage) = &generated.usage {
            let cost = self.usage.record(usage);
            tracing::debug!(model = %usage.model, cost, "generation usage");
        }
        Ok(generated)
    }

    async fn invoke<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> SessionResult<T> {
        let value = self.channel.invoke(method, params).await?;
        serde_json::from_value(value).map_err(|source| SessionError::Decode {
            method: method.to_string(),
            source,
        })
    }
}
