//! Background tasks attached to a running gateway process.
//!
//! Both tasks only ever send on an unbounded channel, so neither can block
//! the request/response path.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Something observed about a gateway process, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// One line the process wrote to stderr.
    Line { generation: u64, text: String },
    /// The process exited on its own.
    Exited { generation: u64, code: Option<i32> },
}

/// Forward every stderr line until the stream closes.
pub(crate) fn spawn_drain(
    stderr: ChildStderr,
    generation: u64,
    events: mpsc::UnboundedSender<DiagnosticEvent>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if events.send(DiagnosticEvent::Line { generation, text }).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, generation, "stderr drain stopped");
                    break;
                }
            }
        }
    });
}

/// Poll the child's liveness every `interval` and report its exit once.
pub(crate) fn spawn_monitor(
    child: Arc<Mutex<Child>>,
    generation: u64,
    interval: Duration,
    events: mpsc::UnboundedSender<DiagnosticEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let status = child.lock().await.try_wait();
            match status {
                Ok(Some(status)) => {
                    let _ = events.send(DiagnosticEvent::Exited {
                        generation,
                        code: status.code(),
                    });
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, generation, "liveness check failed");
                    break;
                }
            }
        }
    })
}
