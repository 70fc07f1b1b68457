//! Semantic question cache.
//!
//! Maps natural-language questions to SQL that has already been validated
//! and executed successfully, so near-duplicate questions skip generation.
//!
//! # Design
//!
//! ```text
//!   question ──► Embedder ──► nearest stored embedding ──► distance < threshold ? sql : miss
//!
//!   record(question, sql) ──► upsert keyed by sha256(question)
//! ```
//!
//! - Strict threshold: a false hit silently answers the wrong question, so
//!   precision wins over hit rate.
//! - Best effort: embedding and storage failures are logged and turn into a
//!   miss (or a skipped write). They are never returned to the caller.
//! - Only the caller decides when to record; it must do so after a
//!   successful execution, never after generation alone.

mod embed;
mod hash;
mod vector;

pub use embed::{Embedder, EmbeddingError, GeminiEmbedder};
pub use hash::question_key;
pub use vector::{CacheEntry, Distance, Neighbor, VectorStore};

use std::sync::Arc;

use serde_json::Value;

use crate::config::CacheSettings;

/// Default acceptance threshold under squared L2.
pub const DEFAULT_THRESHOLD: f32 = 0.2;

/// Errors from the cache's durable storage.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("stored embedding for {0} is corrupt")]
    CorruptEmbedding(String),

    #[error("cache lock poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// The stored question that matched.
    pub question: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub distance: f32,
}

/// Outcome of embedding a question and searching for it.
///
/// The embedding is kept so a later [`SemanticCache::record_search`] does not
/// embed the same question twice.
#[derive(Debug, Clone, Default)]
pub struct CacheSearch {
    /// `None` when embedding failed; such a result can never be recorded.
    pub embedding: Option<Vec<f32>>,
    pub hit: Option<CacheHit>,
}

/// Nearest-neighbour cache over question embeddings.
pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    threshold: f32,
    metric: Distance,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, store: VectorStore) -> Self {
        Self {
            embedder,
            store,
            threshold: DEFAULT_THRESHOLD,
            metric: Distance::default(),
        }
    }

    /// Open the on-disk store named by `settings`.
    pub fn from_settings(settings: &CacheSettings, embedder: Arc<dyn Embedder>) -> CacheResult<Self> {
        let path = settings.cache_path().map_err(|_| CacheError::NoCacheDir)?;
        Ok(Self::new(embedder, VectorStore::open(path)?)
            .with_threshold(settings.threshold)
            .with_metric(settings.metric))
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_metric(mut self, metric: Distance) -> Self {
        self.metric = metric;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed `question` and look for a stored neighbour within the threshold.
    pub async fn search(&self, question: &str) -> CacheSearch {
        let embedding = match self.embedder.embed(question).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, treating as cache miss");
                return CacheSearch::default();
            }
        };

        let hit = match self.store.nearest(&embedding, self.metric) {
            Ok(Some(neighbor)) if neighbor.distance < self.threshold => {
                tracing::info!(
                    distance = neighbor.distance,
                    matched = %neighbor.entry.question,
                    "semantic cache hit"
                );
                Some(CacheHit {
                    question: neighbor.entry.question,
                    sql: neighbor.entry.sql,
                    params: neighbor.entry.params,
                    distance: neighbor.distance,
                })
            }
            Ok(Some(neighbor)) => {
                tracing::debug!(distance = neighbor.distance, threshold = self.threshold, "nearest entry too far");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cache search failed, treating as cache miss");
                None
            }
        };

        CacheSearch {
            embedding: Some(embedding),
            hit,
        }
    }

    /// SQL stored for a question close enough to `question`, if any.
    pub async fn lookup(&self, question: &str) -> Option<String> {
        self.search(question).await.hit.map(|hit| hit.sql)
    }

    /// Store `sql` for `question`, overwriting any entry for the same text.
    ///
    /// Returns whether an entry was written.
    pub async fn record(&self, question: &str, sql: &str) -> bool {
        let search = match self.embedder.embed(question).await {
            Ok(embedding) => CacheSearch {
                embedding: Some(embedding),
                hit: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, not caching");
                return false;
            }
        };
        self.record_search(&search, question, sql, &[])
    }

    /// Store `sql` and `params` for `question` using the embedding from the search.
    ///
    /// A search without an embedding records nothing.
    pub fn record_search(&self, search: &CacheSearch, question: &str, sql: &str, params: &[Value]) -> bool {
        let Some(embedding) = &search.embedding else {
            return false;
        };

        let entry = CacheEntry {
            key: question_key(question),
            question: question.to_string(),
            sql: sql.to_string(),
            params: params.to_vec(),
            embedding: embedding.clone(),
        };

        match self.store.upsert(&entry) {
            Ok(()) => {
                tracing::debug!(key = %entry.key, "cached query");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write cache entry");
                false
            }
        }
    }

    pub fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        self.store.entries()
    }

    pub fn count(&self) -> CacheResult<usize> {
        self.store.count()
    }

    pub fn clear(&self) -> CacheResult<usize> {
        self.store.clear()
    }
}
