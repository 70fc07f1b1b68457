//! PostgreSQL-backed [`Store`].
//!
//! Every call opens its own connection, runs inside a `READ ONLY`
//! transaction with a `SET LOCAL statement_timeout`, streams rows with
//! `query_raw` until the limit is reached, and rolls back. Nothing is
//! pooled; the connection closes when the client is dropped.

use std::error::Error;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};

use super::store::{Store, StoreError};
use crate::config::ConnectionConfig;
use crate::transport::Row;

type BoxError = Box<dyn Error + Sync + Send>;

/// Store that runs each statement on a fresh PostgreSQL connection.
#[derive(Debug, Clone)]
pub struct PgStore {
    config: ConnectionConfig,
    statement_timeout: Duration,
}

impl PgStore {
    pub fn new(config: ConnectionConfig, statement_timeout: Duration) -> Self {
        Self {
            config,
            statement_timeout,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn connect(&self) -> Result<Client, StoreError> {
        let pg_config = self
            .config
            .to_pg_config()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| StoreError::Connect(describe(&e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "database connection closed with error");
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn fetch(&self, sql: &str, params: &[Value], limit: usize) -> Result<Vec<Row>, StoreError> {
        let mut client = self.connect().await?;

        let tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(query_error)?;

        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .await
        .map_err(query_error)?;

        let statement = tx.prepare(sql).await.map_err(query_error)?;
        let expected = statement.params().len();
        if expected != params.len() {
            return Err(StoreError::Param {
                index: params.len().min(expected) + 1,
                message: format!("statement takes {expected} parameters, {} given", params.len()),
            });
        }

        let bound: Vec<JsonParam<'_>> = params.iter().map(JsonParam).collect();

        let rows = {
            let stream = tx
                .query_raw(&statement, bound.iter())
                .await
                .map_err(query_error)?;
            futures::pin_mut!(stream);

            let mut rows = Vec::new();
            while rows.len() < limit {
                match stream.try_next().await.map_err(query_error)? {
                    Some(row) => rows.push(row_to_json(&row).map_err(query_error)?),
                    None => break,
                }
            }
            rows
        };

        tx.rollback().await.map_err(query_error)?;
        Ok(rows)
    }
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(describe(&e))
}

/// Prefer the server's own message over the driver's generic "db error".
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => e.to_string(),
    }
}

// ============================================================================
// Bind Parameters
// ============================================================================

/// A JSON value bound to whatever type the server inferred for its slot.
#[derive(Debug)]
struct JsonParam<'a>(&'a Value);

impl ToSql for JsonParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        encode_param(self.0, ty, out)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn encode_param(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if let Kind::Domain(base) = ty.kind() {
        return encode_param(value, base, out);
    }

    match value {
        Value::Null => Ok(IsNull::Yes),
        _ if *ty == Type::JSON || *ty == Type::JSONB => value.to_sql(ty, out),
        Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
        Value::Number(n) => encode_number(n, ty, out),
        Value::String(s) => encode_text(s, ty, out),
        Value::Array(items) if is_text_array(ty) => {
            let texts = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(Some(s.as_str())),
                    Value::Null => Ok(None),
                    other => Err(format!("expected text array element, got {other}")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            texts.to_sql(ty, out)
        }
        other => Err(format!("cannot bind {other} to a parameter of type {ty}").into()),
    }
}

fn encode_number(n: &Number, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let not_integer = || format!("{n} is not an integer");
    match *ty {
        Type::INT2 => i16::try_from(n.as_i64().ok_or_else(not_integer)?)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(n.as_i64().ok_or_else(not_integer)?)?.to_sql(ty, out),
        Type::INT8 => n.as_i64().ok_or_else(not_integer)?.to_sql(ty, out),
        Type::FLOAT4 => (n.as_f64().unwrap_or_default() as f32).to_sql(ty, out),
        Type::FLOAT8 => n.as_f64().unwrap_or_default().to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(&n.to_string())?.to_sql(ty, out),
        _ if is_text(ty) => n.to_string().to_sql(ty, out),
        _ => Err(format!("cannot bind number {n} to a parameter of type {ty}").into()),
    }
}

fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(s.trim())?.to_sql(ty, out),
        Type::BOOL => s.trim().parse::<bool>()?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIMESTAMP => s.parse::<NaiveDateTime>()?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
        _ if is_text(ty) => s.to_sql(ty, out),
        _ => match ty.kind() {
            // Enum labels travel as their text.
            Kind::Enum(_) => {
                out.extend_from_slice(s.as_bytes());
                Ok(IsNull::No)
            }
            _ => Err(format!("cannot bind string to a parameter of type {ty}").into()),
        },
    }
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn is_text_array(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY
    )
}

// ============================================================================
// Result Columns
// ============================================================================

/// A column value decoded straight to JSON.
struct JsonCell(Value);

impl<'a> FromSql<'a> for JsonCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode_cell(ty, raw).map(JsonCell)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(JsonCell(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn row_to_json(row: &tokio_postgres::Row) -> Result<Row, tokio_postgres::Error> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let JsonCell(value) = row.try_get(idx)?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_cell(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    if let Kind::Domain(base) = ty.kind() {
        return decode_cell(base, raw);
    }

    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => i16::from_sql(ty, raw)?.into(),
        Type::INT4 => i32::from_sql(ty, raw)?.into(),
        Type::INT8 => i64::from_sql(ty, raw)?.into(),
        Type::OID => u32::from_sql(ty, raw)?.into(),
        Type::FLOAT4 => float(f32::from_sql(ty, raw)? as f64),
        Type::FLOAT8 => float(f64::from_sql(ty, raw)?),
        // Exact decimal text; an f64 would round large or high-scale values.
        Type::NUMERIC => Value::String(Decimal::from_sql(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMP => Value::String(
            NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::TIMESTAMPTZ => Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            Value::Array(
                Vec::<Option<String>>::from_sql(ty, raw)?
                    .into_iter()
                    .map(|item| item.map(Value::String).unwrap_or(Value::Null))
                    .collect(),
            )
        }
        Type::INT4_ARRAY => Value::Array(
            Vec::<Option<i32>>::from_sql(ty, raw)?
                .into_iter()
                .map(|item| item.map(Value::from).unwrap_or(Value::Null))
                .collect(),
        ),
        _ if is_text(ty) => Value::String(String::from_sql(&Type::TEXT, raw)?),
        _ => match ty.kind() {
            Kind::Enum(_) => Value::String(String::from_sql(&Type::TEXT, raw)?),
            _ => {
                tracing::debug!(column_type = %ty, "no JSON mapping for column type, returning null");
                Value::Null
            }
        },
    };
    Ok(value)
}

/// Non-finite floats have no JSON form.
fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
