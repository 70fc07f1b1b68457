//! The SQL gateway.
//!
//! Every statement that reaches the relational store passes through here:
//!
//! ```text
//!   query ──► validate ──► Store::fetch(cap + 1) ──► cap rows ──► ExecutionResult
//!                │                  │
//!                ▼                  ▼
//!        Rejected(reason)    Execution(detail)
//! ```
//!
//! Validation happens before any store contact. A rejected query never
//! reaches the database and is not logged as a fault.

mod generate;
mod postgres;
mod store;
mod validate;

use std::ops::Not;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transport::Row;

pub use generate::{GenerateError, Generated, LocalGenerator, SqlGenerator, LOCAL_PROVIDER};
pub use postgres::PgStore;
pub use store::{Store, StoreError};
pub use validate::{validate, RejectReason, ValidatedQuery};

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why a gateway call did not produce rows.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Policy violation, decided without touching the store.
    #[error("query rejected: {0}")]
    Rejected(RejectReason),

    /// The store failed while running an accepted statement.
    #[error("query failed: {0}")]
    Execution(String),
}

impl GatewayError {
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            GatewayError::Rejected(reason) => Some(*reason),
            GatewayError::Execution(_) => None,
        }
    }
}

/// Rows returned by one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Rows in server order, at most the row cap.
    pub rows: Vec<Row>,
    /// True iff the full result had more rows than the cap.
    #[serde(default, skip_serializing_if = "Not::not")]
    pub truncated: bool,
    /// Explanation of the cap, present iff `truncated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExecutionResult {
    /// Cut `rows` to `cap`, flagging the result if anything was dropped.
    pub fn capped(mut rows: Vec<Row>, cap: usize) -> Self {
        if rows.len() > cap {
            rows.truncate(cap);
            Self {
                rows,
                truncated: true,
                note: Some(format!("Result truncated to {cap} rows (row cap {cap})")),
            }
        } else {
            Self {
                rows,
                truncated: false,
                note: None,
            }
        }
    }
}

/// Validates and runs read-only SQL against a [`Store`].
///
/// Stateless per call; the store hands out a fresh session each time.
#[derive(Clone)]
pub struct SqlGateway {
    store: Arc<dyn Store>,
    default_max_rows: usize,
}

impl SqlGateway {
    pub fn new(store: Arc<dyn Store>, default_max_rows: usize) -> Self {
        Self {
            store,
            default_max_rows: default_max_rows.max(1),
        }
    }

    pub fn default_max_rows(&self) -> usize {
        self.default_max_rows
    }

    /// Validate and run `query`.
    ///
    /// `max_rows` overrides the configured cap for this call; a cap of 0 is
    /// treated as 1.
    pub async fn execute(
        &self,
        query: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> GatewayResult<ExecutionResult> {
        let validated = validate(query).map_err(|reason| {
            tracing::debug!(%reason, "query rejected");
            GatewayError::Rejected(reason)
        })?;

        let cap = max_rows.unwrap_or(self.default_max_rows).max(1);
        let started = Instant::now();

        let rows = self
            .store
            .fetch(validated.as_str(), params, cap.saturating_add(1))
            .await
            .map_err(|e| {
                tracing::error!(
                    query = validated.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "query failed"
                );
                GatewayError::Execution(e.to_string())
            })?;

        let result = ExecutionResult::capped(rows, cap);
        tracing::info!(
            rows = result.rows.len(),
            truncated = result.truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query executed"
        );
        Ok(result)
    }
}
