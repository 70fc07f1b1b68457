//! Tool dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::gateway::{
    GatewayError, GenerateError, LocalGenerator, SqlGateway, SqlGenerator, Store, LOCAL_PROVIDER,
};
use crate::schema::SchemaIntrospector;
use crate::transport::protocol::{
    methods, ExecuteSqlParams, GetTableSchemaParams, GetTableSchemaResult, ListTablesResult,
    TextToSqlParams, TextToSqlResult,
};
use crate::transport::{Request, Response};

/// Note attached to SQL that was not run because the generator was unsure.
pub const REVIEW_NOTE: &str =
    "Generator not confident; review or modify the SQL and run it with execute_sql";

/// Why a tool call failed. Rendered into the response's `error` field.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(#[source] serde_json::Error),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("generation failed: {0}")]
    Generate(#[from] GenerateError),

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Routes tool requests to the gateway, the introspector and generators.
pub struct ToolRouter {
    gateway: SqlGateway,
    schema: SchemaIntrospector,
    generators: HashMap<String, Arc<dyn SqlGenerator>>,
}

impl ToolRouter {
    /// Router over `store` with the built-in `local` generator registered.
    pub fn new(store: Arc<dyn Store>, max_rows: usize) -> Self {
        let mut router = Self {
            gateway: SqlGateway::new(store.clone(), max_rows),
            schema: SchemaIntrospector::new(store),
            generators: HashMap::new(),
        };
        router.register(Arc::new(LocalGenerator::new()));
        router
    }

    /// Add a generator, replacing any with the same name.
    pub fn register(&mut self, generator: Arc<dyn SqlGenerator>) {
        self.generators.insert(generator.name().to_string(), generator);
    }

    pub fn gateway(&self) -> &SqlGateway {
        &self.gateway
    }

    /// Answer one request. Never fails: errors become `{id, error}`.
    pub async fn dispatch(&self, request: Request) -> Response {
        let Request { id, method, params } = request;
        match self.handle(&method, params).await {
            Ok(result) => Response::ok(id, result),
            Err(e) => {
                match &e {
                    ToolError::Gateway(GatewayError::Execution(_)) | ToolError::Encode(_) => {
                        tracing::error!(method = %method, error = %e, "tool failed")
                    }
                    _ => tracing::debug!(method = %method, error = %e, "tool refused"),
                }
                Response::err(id, e.to_string())
            }
        }
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        match method {
            methods::LIST_TABLES => {
                let tables = self.schema.list_tables().await?;
                encode(&ListTablesResult {
                    tables: tables.into_iter().collect(),
                })
            }
            methods::GET_TABLE_SCHEMA => {
                let params: GetTableSchemaParams = decode(params)?;
                let schema_rows = self.schema.get_table_schema(&params.table_names).await?;
                encode(&GetTableSchemaResult { schema_rows })
            }
            methods::RUN_PAGILA_QUERY | methods::EXECUTE_SQL => {
                let params: ExecuteSqlParams = decode(params)?;
                let bind = params.params.unwrap_or_default();
                let result = self
                    .gateway
                    .execute(&params.query, &bind, params.max_rows)
                    .await?;
                encode(&result)
            }
            methods::TEXT_TO_SQL => {
                let params: TextToSqlParams = decode(params)?;
                encode(&self.text_to_sql(params).await?)
            }
            other => Err(ToolError::UnknownMethod(other.to_string())),
        }
    }

    async fn text_to_sql(&self, params: TextToSqlParams) -> Result<TextToSqlResult, ToolError> {
        let provider = params.provider.as_deref().unwrap_or(LOCAL_PROVIDER);
        let generator = self
            .generators
            .get(provider)
            .ok_or_else(|| ToolError::UnknownProvider(provider.to_string()))?;

        let generated = generator.generate(&params.text).await?;
        let mut result = TextToSqlResult {
            sql: generated.sql,
            params: generated.params,
            confident: generated.confident,
            note: generated.note,
            rows: None,
            truncated: false,
            usage: generated.usage,
        };

        if params.execute {
            if result.confident {
                let executed = self.gateway.execute(&result.sql, &result.params, None).await?;
                result.rows = Some(executed.rows);
                result.truncated = executed.truncated;
                if executed.note.is_some() {
                    result.note = executed.note;
                }
            } else {
                result.note = Some(match result.note.take() {
                    Some(reason) => format!("{REVIEW_NOTE} ({reason})"),
                    None => REVIEW_NOTE.to_string(),
                });
            }
        }

        Ok(result)
    }
}

/// Absent params decode as an empty object.
fn decode<T: DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(ToolError::InvalidParams)
}

fn encode<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::Encode)
}
