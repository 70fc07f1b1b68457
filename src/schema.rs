//! Catalog queries for table and column metadata.
//!
//! These are fixed internal statements, so they skip keyword validation and
//! go straight to the [`Store`]. Store failures surface as
//! [`GatewayError::Execution`], same as user queries.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::gateway::{GatewayError, GatewayResult, Store};
use crate::transport::protocol::SchemaRow;
use crate::transport::Row;

const LIST_TABLES_SQL: &str = "SELECT table_name::text AS table_name \
     FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const TABLE_SCHEMA_SQL: &str = "SELECT table_name::text AS table_name, \
     column_name::text AS column_name, data_type::text AS data_type \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name::text = ANY($1::text[]) \
     ORDER BY table_name, ordinal_position";

/// Reads table and column metadata from the store's catalog.
#[derive(Clone)]
pub struct SchemaIntrospector {
    store: Arc<dyn Store>,
}

impl SchemaIntrospector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Names of the base tables in the `public` schema.
    pub async fn list_tables(&self) -> GatewayResult<BTreeSet<String>> {
        let rows = self.fetch(LIST_TABLES_SQL, &[]).await?;
        rows.iter().map(|row| text_field(row, "table_name")).collect()
    }

    /// Columns of the named tables, ordered by table then ordinal position.
    ///
    /// Unknown names contribute no rows. An empty request returns nothing
    /// without contacting the store.
    pub async fn get_table_schema(&self, table_names: &[String]) -> GatewayResult<Vec<SchemaRow>> {
        if table_names.is_empty() {
            return Ok(Vec::new());
        }

        let names = Value::Array(table_names.iter().cloned().map(Value::String).collect());
        let rows = self.fetch(TABLE_SCHEMA_SQL, &[names]).await?;

        rows.iter()
            .map(|row| {
                Ok(SchemaRow {
                    table: text_field(row, "table_name")?,
                    column: text_field(row, "column_name")?,
                    data_type: text_field(row, "data_type")?,
                })
            })
            .collect()
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> GatewayResult<Vec<Row>> {
        self.store.fetch(sql, params, usize::MAX).await.map_err(|e| {
            tracing::error!(query = sql, error = %e, "catalog query failed");
            GatewayError::Execution(e.to_string())
        })
    }
}

fn text_field(row: &Row, column: &str) -> GatewayResult<String> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(GatewayError::Execution(format!(
            "catalog row has no text column {column:?} (got {other:?})"
        ))),
    }
}
