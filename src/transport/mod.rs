//! Gateway transport module.
//!
//! This module carries tool calls from the driver to the gateway process
//! and back. It has no business logic: it serializes, deserializes and
//! correlates.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Driver (Rust + Tokio)                    │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   Transport (half-duplex)                 │  │
//! │  │  - One JSON object per line                               │  │
//! │  │  - Write, flush, then read exactly one response line      │  │
//! │  │  - Response id must echo the request id                   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │               stdin (NDJSON) │ stdout (NDJSON)   stderr (logs)  │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Gateway process (`sqlgate serve`)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Retry policy does not live here; see [`crate::supervisor`].

mod client;
mod error;
pub mod protocol;

pub use client::{ProcessTransport, Transport, DEFAULT_TIMEOUT_SECS};
pub use error::{TransportError, TransportResult};
pub use protocol::{methods, Outcome, Request, Response, Row};
