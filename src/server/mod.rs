//! The gateway process side of the tool protocol.
//!
//! ```text
//!   stdin  ──► line ──► Request ──► ToolRouter ──► Response ──► line ──► stdout
//! ```
//!
//! One response line per request line, in order. Blank lines are skipped.
//! A line that cannot be read as a request, including one that is not UTF-8
//! or runs past [`MAX_REQUEST_BYTES`], gets an error response and the loop
//! carries on.
//! Logging goes to stderr, which the supervisor drains.

mod dispatch;

pub use dispatch::{ToolError, ToolRouter, REVIEW_NOTE};

use std::io;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::config::{Settings, SettingsError};
use crate::gateway::PgStore;
use crate::transport::{Request, Response};

/// Errors that stop the server.
#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("protocol stream failed: {0}")]
    Io(#[from] io::Error),
}

/// Counters for one `serve` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub requests: u64,
    pub errors: u64,
}

/// Longest request line accepted, in bytes, excluding the newline.
pub const MAX_REQUEST_BYTES: usize = 1 << 20;

/// Answer request lines from `reader` on `writer` until EOF.
///
/// A line that is not a valid request gets `{"id": null, "error": ...}`.
/// Tool failures become error responses; only I/O errors end the loop early.
pub async fn serve<R, W>(reader: R, writer: W, router: &ToolRouter) -> io::Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    serve_bounded(reader, writer, router, MAX_REQUEST_BYTES).await
}

/// [`serve`] with an explicit request line limit.
///
/// A longer line is discarded up to its newline and answered with an
/// `invalid request` error.
pub async fn serve_bounded<R, W>(
    mut reader: R,
    mut writer: W,
    router: &ToolRouter,
    max_line_bytes: usize,
) -> io::Result<ServeStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = ServeStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let limit = u64::try_from(max_line_bytes).unwrap_or(u64::MAX).saturating_add(1);
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            break;
        }

        let response = if buf.last() != Some(&b'\n') && buf.len() > max_line_bytes {
            discard_line(&mut reader).await?;
            tracing::warn!(max_line_bytes, "oversized request line");
            invalid_request(format!("line exceeds {max_line_bytes} bytes"))
        } else {
            match parse_line(&buf) {
                None => continue,
                Some(Ok(request)) => {
                    tracing::debug!(method = %request.method, "request");
                    router.dispatch(request).await
                }
                Some(Err(message)) => {
                    tracing::warn!(error = %message, "unparseable request line");
                    invalid_request(message)
                }
            }
        };

        stats.requests += 1;
        if response.is_error() {
            stats.errors += 1;
        }

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
        writer.flush().await?;
    }

    tracing::info!(requests = stats.requests, errors = stats.errors, "input closed, shutting down");
    Ok(stats)
}

/// `None` for a blank line.
fn parse_line(bytes: &[u8]) -> Option<Result<Request, String>> {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.trim(),
        Err(e) => return Some(Err(e.to_string())),
    };
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).map_err(|e| e.to_string()))
}

fn invalid_request(message: impl std::fmt::Display) -> Response {
    Response::err(Value::Null, format!("invalid request: {message}"))
}

/// Skip input up to and including the next newline.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(());
            }
            None => {
                let n = available.len();
                reader.consume(n);
            }
        }
    }
}

/// Serve on stdin/stdout against the configured PostgreSQL database.
pub async fn run_stdio(settings: &Settings) -> Result<ServeStats, ServeError> {
    let connection = settings.database.connection_config()?;
    tracing::info!(database = %connection.label(), "serving tools on stdio");

    let store = PgStore::new(connection, settings.gateway.statement_timeout());
    let router = ToolRouter::new(Arc::new(store), settings.gateway.effective_max_rows());

    let stats = serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), &router).await?;
    Ok(stats)
}
