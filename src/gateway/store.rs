//! The relational store seam.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::transport::Row;

/// Errors raised by a store while running a statement.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid connection settings: {0}")]
    Config(String),

    #[error("could not connect to the database: {0}")]
    Connect(String),

    #[error("bind parameter ${index}: {message}")]
    Param { index: usize, message: String },

    #[error("{0}")]
    Query(String),
}

/// Something that can run one read-only statement.
///
/// Implementations must leave no state behind between calls: each call gets
/// its own isolated, non-mutating session that is released on every exit
/// path.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run `sql` with positional `params` and return at most `limit` rows,
    /// in the order the server produced them.
    async fn fetch(&self, sql: &str, params: &[Value], limit: usize) -> Result<Vec<Row>, StoreError>;
}
