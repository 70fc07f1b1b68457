//! SQLite-backed vector storage for cache entries.
//!
//! Embeddings are stored as little-endian `f32` blobs. Nearest-neighbour
//! search is a linear scan; a local question cache stays small enough that
//! an index would not pay for itself.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CacheError, CacheResult};

/// Current storage schema version. Bump this when the table layout changes.
const STORE_VERSION: i32 = 1;

/// Distance between two embeddings. Smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Sum of squared component differences.
    #[default]
    SquaredL2,
    /// `1 - cosine similarity`.
    Cosine,
}

impl Distance {
    /// Distance between `a` and `b`, or `None` if it is undefined
    /// (different dimensions, or a zero vector under cosine).
    pub fn between(&self, a: &[f32], b: &[f32]) -> Option<f32> {
        if a.len() != b.len() || a.is_empty() {
            return None;
        }
        match self {
            Distance::SquaredL2 => Some(a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()),
            Distance::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return None;
                }
                Some(1.0 - dot / (norm_a * norm_b))
            }
        }
    }
}

/// A stored (question, SQL) association.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    /// `question_key(question)`.
    pub key: String,
    pub question: String,
    pub sql: String,
    /// Bind params the SQL was executed with.
    pub params: Vec<Value>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// Closest stored entry to a query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub entry: CacheEntry,
    pub distance: f32,
}

/// Durable store of [`CacheEntry`] rows.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    /// Open or create the store at `path`, creating parent directories.
    ///
    /// If the stored schema version doesn't match, entries are cleared.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                sql TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '[]',
                embedding BLOB NOT NULL,
                dim INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(STORE_VERSION) {
            if stored_version.is_some() {
                tracing::info!(from = ?stored_version, to = STORE_VERSION, "cache schema changed, clearing entries");
                conn.execute("DELETE FROM entries", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![STORE_VERSION.to_string()],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Insert or overwrite the entry with the same key.
    pub fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        let params_json = serde_json::to_string(&entry.params)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);

        self.lock()?.execute(
            "INSERT OR REPLACE INTO entries (key, question, sql, params, embedding, dim, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.key,
                entry.question,
                entry.sql,
                params_json,
                encode_embedding(&entry.embedding),
                entry.embedding.len() as i64,
                now
            ],
        )?;
        Ok(())
    }

    /// Get an entry by key.
    pub fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT key, question, sql, params, embedding FROM entries WHERE key = ?",
                params![key],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::decode).transpose()
    }

    /// Closest entry to `query` under `metric`.
    ///
    /// Entries of a different dimension are skipped, and so are rows that
    /// fail to decode.
    pub fn nearest(&self, query: &[f32], metric: Distance) -> CacheResult<Option<Neighbor>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT key, question, sql, params, embedding FROM entries WHERE dim = ?")?;
        let rows = stmt
            .query_map(params![query.len() as i64], RawEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut best: Option<Neighbor> = None;
        for raw in rows {
            let key = raw.key.clone();
            let entry = match raw.decode() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable cache entry");
                    continue;
                }
            };
            let Some(distance) = metric.between(query, &entry.embedding) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| distance < b.distance) {
                best = Some(Neighbor { entry, distance });
            }
        }
        Ok(best)
    }

    /// All entries, most recently written first.
    pub fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, question, sql, params, embedding FROM entries ORDER BY updated_at DESC, key",
        )?;
        let rows = stmt
            .query_map([], RawEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawEntry::decode).collect()
    }

    pub fn count(&self) -> CacheResult<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete one entry.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let rows = self
            .lock()?
            .execute("DELETE FROM entries WHERE key = ?", params![key])?;
        Ok(rows > 0)
    }

    /// Delete all entries, returning how many were removed.
    pub fn clear(&self) -> CacheResult<usize> {
        Ok(self.lock()?.execute("DELETE FROM entries", [])?)
    }
}

/// Row as read from SQLite, before blob and JSON decoding.
struct RawEntry {
    key: String,
    question: String,
    sql: String,
    params: String,
    embedding: Vec<u8>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            question: row.get(1)?,
            sql: row.get(2)?,
            params: row.get(3)?,
            embedding: row.get(4)?,
        })
    }

    fn decode(self) -> CacheResult<CacheEntry> {
        let embedding = decode_embedding(&self.embedding)
            .ok_or_else(|| CacheError::CorruptEmbedding(self.key.clone()))?;
        Ok(CacheEntry {
            params: serde_json::from_str(&self.params)?,
            key: self.key,
            question: self.question,
            sql: self.sql,
            embedding,
        })
    }
}

fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
