//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlgate::cache::{Embedder, EmbeddingError};
use sqlgate::gateway::{Store, StoreError};
use sqlgate::transport::Row;

/// One call seen by [`FakeStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub sql: String,
    pub params: Vec<Value>,
    pub limit: usize,
}

/// In-memory store returning canned rows, honoring the row limit.
#[derive(Default)]
pub struct FakeStore {
    rows: Vec<Row>,
    failure: Option<String>,
    calls: Mutex<Vec<FetchCall>>,
}

impl FakeStore {
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn fetch(&self, sql: &str, params: &[Value], limit: usize) -> Result<Vec<Row>, StoreError> {
        self.calls.lock().unwrap().push(FetchCall {
            sql: sql.to_string(),
            params: params.to_vec(),
            limit,
        });
        if let Some(message) = &self.failure {
            return Err(StoreError::Query(message.clone()));
        }
        Ok(self.rows.iter().take(limit).cloned().collect())
    }
}

/// Build a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row must be an object, got {other}"),
    }
}

/// `count` rows of `{"title": "Film N"}`.
pub fn film_rows(count: usize) -> Vec<Row> {
    (1..=count)
        .map(|i| row(json!({ "title": format!("Film {i}") })))
        .collect()
}

/// Embedder with fixed vectors per text. Unknown text fails.
#[derive(Default)]
pub struct FakeEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors.get(text).cloned().ok_or(EmbeddingError::Empty)
    }
}
