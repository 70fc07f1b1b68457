//! Half-duplex request/response client.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use super::error::{TransportError, TransportResult};
use super::protocol::{Request, Response};

/// Default timeout for one response line (30 seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest slice of a bad response line kept in errors.
const MAX_ECHOED_LINE: usize = 200;

/// Transport over a gateway process's stdout/stdin pipes.
pub type ProcessTransport = Transport<BufReader<ChildStdout>, ChildStdin>;

/// Line-oriented request/response client.
///
/// Each request is serialized to a single JSON line, written and flushed,
/// and exactly one response line is read back. `send` takes `&mut self`, so
/// at most one request is ever in flight on a transport; callers issuing
/// tool calls concurrently must serialize them.
///
/// # Example
///
/// ```ignore
/// use sqlgate::transport::{Transport, protocol::methods};
///
/// let mut transport = Transport::new(reader, writer, Duration::from_secs(30));
/// let response = transport.call(methods::LIST_TABLES, json!({})).await?;
/// ```
pub struct Transport<R, W> {
    reader: R,
    writer: W,
    timeout: Duration,
}

impl<R, W> Transport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            timeout,
        }
    }

    /// Send a request and wait for its response line.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Writing or flushing the request fails
    /// - The stream closes before a response line arrives
    /// - No line arrives within the timeout
    /// - The line is not a valid response, or answers a different id
    ///
    /// A tool-level failure is *not* an error here: it comes back as a
    /// [`Response`] whose outcome is an error message.
    pub async fn send(&mut self, request: &Request) -> TransportResult<Response> {
        let mut line = serde_json::to_string(request).map_err(TransportError::SerializeFailed)?;
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(TransportError::WriteFailed)?;
        self.writer
            .flush()
            .await
            .map_err(TransportError::WriteFailed)?;

        let mut response_line = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut response_line))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_secs()))?
            .map_err(TransportError::ReadFailed)?;

        if read == 0 {
            return Err(TransportError::Closed);
        }

        let response: Response =
            serde_json::from_str(response_line.trim_end()).map_err(|source| {
                TransportError::Malformed {
                    line: shorten(response_line.trim_end()),
                    source,
                }
            })?;

        if response.id != request.id {
            return Err(TransportError::Mismatched {
                expected: request.id.clone(),
                actual: response.id,
            });
        }

        Ok(response)
    }

    /// Send a request with a fresh correlation id.
    pub async fn call(&mut self, method: &str, params: Value) -> TransportResult<Response> {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(&Request::new(id, method, params)).await
    }

    /// Get the current response timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the response timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

fn shorten(line: &str) -> String {
    match line.char_indices().nth(MAX_ECHOED_LINE) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}
