//! # sqlgate
//!
//! A sandboxed SQL tool gateway for language-model agents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── driver process ─────────────────────────┐
//! │  Session ── SemanticCache (embed, nearest neighbour, SQLite)     │
//! │     │       UsageLedger (tokens, cost, JSON)                     │
//! │     ▼                                                            │
//! │  Supervisor (spawn, drain stderr, poll liveness, backoff)        │
//! │     │                                                            │
//! │  Transport (one JSON line out, one JSON line back)               │
//! └─────┼────────────────────────────────────────────────────────────┘
//!       │ stdin/stdout
//! ┌─────▼────────────────── gateway process ────────────────────────┐
//! │  server::serve ──► ToolRouter                                    │
//! │                      ├── SqlGateway (validate, cap rows)         │
//! │                      ├── SchemaIntrospector                      │
//! │                      └── SqlGenerator (text_to_sql)              │
//! │                             │                                    │
//! │                           Store (PostgreSQL, read-only session)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The driver never has more than one request outstanding. Every SQL
//! statement passes the gateway's keyword validation and runs in a fresh
//! read-only transaction with a statement timeout.

pub mod cache;
pub mod config;
pub mod gateway;
pub mod schema;
pub mod server;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod usage;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{Embedder, SemanticCache, VectorStore};
    pub use crate::config::Settings;
    pub use crate::gateway::{ExecutionResult, GatewayError, RejectReason, SqlGateway, Store};
    pub use crate::server::ToolRouter;
    pub use crate::session::{Answer, AnswerSource, Session, ToolChannel};
    pub use crate::supervisor::Supervisor;
    pub use crate::transport::{Request, Response, Row};
}
