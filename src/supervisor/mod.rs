//! Gateway process supervision.
//!
//! The driver owns one [`Supervisor`], which owns the gateway child process,
//! the transport over its pipes, and two background tasks:
//!
//! ```text
//!              ┌──────────── Supervisor ─────────────┐
//!   call() ──► │ Transport ──stdin──►  gateway  ──┐  │
//!              │     ◄──────stdout─────  process  │  │
//!              │                           │stderr│  │
//!              │   drain task ◄────────────┘      │  │
//!              │   monitor task (try_wait / poll) │  │
//!              │        │ events (mpsc)           │  │
//!              │        ▼                         │  │
//!              │   refresh(): lines, exits ───────┘  │
//!              └─────────────────────────────────────┘
//! ```
//!
//! # State machine
//!
//! ```text
//!   Starting ──► Running ──► (exit | transport failure) ──► RestartPending ──► Starting
//!                   │                                           (after backoff,
//!                   └──► terminate() ──► Terminated              on next action)
//! ```
//!
//! - An unexpected exit or a broken call increments the failure count and
//!   sets `backoff_until = now + min(300, 2^failures)` seconds.
//! - No restart happens unobserved: the next driver action starts the
//!   process once the wait has elapsed.
//! - `restart(force)` is the operator path; `force` skips the wait, and a
//!   successful restart resets the failure count.
//! - `terminate()` is a graceful stop and never counts as a failure.
//!
//! Every process gets a fresh generation number. Events from an older
//! generation are ignored, so a restart always wins a race with the monitor.

mod backoff;
mod diagnostics;

pub use backoff::{backoff_secs, FailureTracker, MAX_BACKOFF_SECS};
pub use diagnostics::DiagnosticEvent;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::{SettingsError, SupervisorSettings};
use crate::transport::{
    ProcessTransport, Request, Response, Transport, TransportError, DEFAULT_TIMEOUT_SECS,
};

/// How long a graceful stop waits after closing stdin before killing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Default liveness poll interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors from the supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to start gateway {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("gateway is backing off after {failures} failure(s); retry in {remaining:?}")]
    BackingOff { remaining: Duration, failures: u32 },

    #[error("gateway is not running")]
    NotRunning,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Lifecycle state of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Never started in this session.
    NotStarted,
    Starting,
    Running,
    /// Stopped by the driver.
    Terminated,
    /// Exited or failed; waiting for the next driver action.
    RestartPending,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::NotStarted => "not_started",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Terminated => "terminated",
            ProcessState::RestartPending => "restart_pending",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorStatus {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub generation: u64,
    pub failures: u32,
    /// Seconds until a restart is allowed, rounded up.
    pub backoff_remaining_secs: Option<u64>,
    pub last_exit_code: Option<i32>,
}

/// One running gateway process and everything attached to it.
struct GatewayProcess {
    pid: Option<u32>,
    child: Arc<Mutex<Child>>,
    transport: ProcessTransport,
    monitor: JoinHandle<()>,
}

impl GatewayProcess {
    /// Kill now and reap.
    async fn kill(self) -> Option<i32> {
        self.monitor.abort();
        drop(self.transport);
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(error = %e, "kill failed");
        }
        child.try_wait().ok().flatten().and_then(|status| status.code())
    }

    /// Close stdin and wait up to `grace` for a clean exit, then kill.
    async fn shutdown(self, grace: Duration) -> Option<i32> {
        self.monitor.abort();
        drop(self.transport);
        let mut child = self.child.lock().await;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "wait failed");
                None
            }
            Err(_) => {
                tracing::warn!(grace = ?grace, "gateway did not exit after stdin closed, killing");
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "kill failed");
                }
                child.try_wait().ok().flatten().and_then(|status| status.code())
            }
        }
    }
}

/// Owns the gateway process lifecycle from the driver side.
pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    request_timeout: Duration,
    poll_interval: Duration,
    state: ProcessState,
    process: Option<GatewayProcess>,
    generation: u64,
    failures: FailureTracker,
    last_exit_code: Option<i32>,
    events_tx: mpsc::UnboundedSender<DiagnosticEvent>,
    events_rx: mpsc::UnboundedReceiver<DiagnosticEvent>,
    diagnostics: Vec<String>,
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            program: program.into(),
            args,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: ProcessState::NotStarted,
            process: None,
            generation: 0,
            failures: FailureTracker::new(),
            last_exit_code: None,
            events_tx,
            events_rx,
            diagnostics: Vec::new(),
        }
    }

    pub fn from_settings(settings: &SupervisorSettings) -> Result<Self, SettingsError> {
        let (program, args) = settings.gateway_command()?;
        Ok(Self::new(program, args)
            .with_request_timeout(settings.request_timeout())
            .with_poll_interval(settings.poll_interval()))
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.failures()
    }

    /// Apply queued events: collect stderr lines and account for exits of
    /// the current process.
    pub fn refresh(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                DiagnosticEvent::Line { text, .. } => self.diagnostics.push(text),
                DiagnosticEvent::Exited { generation, code } => {
                    if generation == self.generation && self.state == ProcessState::Running {
                        self.handle_exit(code, Instant::now());
                    } else {
                        tracing::debug!(generation, "ignoring exit of a replaced process");
                    }
                }
            }
        }
    }

    /// Make sure a process is running, starting one if allowed.
    ///
    /// # Errors
    ///
    /// `BackingOff` while a restart wait is in effect, `Spawn` if the
    /// command cannot be launched.
    pub async fn ensure_running(&mut self) -> SupervisorResult<()> {
        self.refresh();
        if self.state == ProcessState::Running {
            return Ok(());
        }
        if let Some(remaining) = self.failures.remaining(Instant::now()) {
            return Err(SupervisorError::BackingOff {
                remaining,
                failures: self.failures.failures(),
            });
        }
        self.start().await
    }

    /// Send one request and wait for its response.
    ///
    /// A transport failure leaves the channel desynchronized, so the process
    /// is killed and the failure counted before the error is returned.
    pub async fn send(&mut self, request: &Request) -> SupervisorResult<Response> {
        self.ensure_running().await?;
        let process = self.process.as_mut().ok_or(SupervisorError::NotRunning)?;

        match process.transport.send(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.fail(&e).await;
                Err(SupervisorError::Transport(e))
            }
        }
    }

    /// Invoke `method` with a fresh correlation id.
    pub async fn call(&mut self, method: &str, params: Value) -> SupervisorResult<Response> {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(&Request::new(id, method, params)).await
    }

    /// Stop the process gracefully. Not a failure; no backoff.
    pub async fn terminate(&mut self) {
        self.refresh();
        if let Some(process) = self.process.take() {
            let code = process.shutdown(SHUTDOWN_GRACE).await;
            self.last_exit_code = code;
            tracing::info!(?code, generation = self.generation, "gateway terminated");
        }
        self.state = ProcessState::Terminated;
    }

    /// Operator restart. `force` skips any backoff wait.
    ///
    /// On success the failure count is reset.
    pub async fn restart(&mut self, force: bool) -> SupervisorResult<()> {
        self.refresh();
        if !force {
            if let Some(remaining) = self.failures.remaining(Instant::now()) {
                return Err(SupervisorError::BackingOff {
                    remaining,
                    failures: self.failures.failures(),
                });
            }
        }

        if let Some(process) = self.process.take() {
            self.last_exit_code = process.shutdown(SHUTDOWN_GRACE).await;
        }
        self.start().await?;
        self.failures.reset();
        tracing::info!(force, generation = self.generation, "gateway restarted by operator");
        Ok(())
    }

    pub fn status(&mut self) -> SupervisorStatus {
        self.refresh();
        SupervisorStatus {
            state: self.state,
            pid: self.process.as_ref().and_then(|p| p.pid),
            generation: self.generation,
            failures: self.failures.failures(),
            backoff_remaining_secs: self
                .failures
                .remaining(Instant::now())
                .map(|left| left.as_secs() + u64::from(left.subsec_nanos() > 0)),
            last_exit_code: self.last_exit_code,
        }
    }

    /// Take every stderr line collected so far, oldest first.
    pub fn drain_diagnostics(&mut self) -> Vec<String> {
        self.refresh();
        std::mem::take(&mut self.diagnostics)
    }

    async fn start(&mut self) -> SupervisorResult<()> {
        self.state = ProcessState::Starting;
        self.generation += 1;
        let generation = self.generation;

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .and_then(|mut child| {
                let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
                let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
                let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
                Ok((child, stdin, stdout, stderr))
            });

        let (child, stdin, stdout, stderr) = match spawned {
            Ok(parts) => parts,
            Err(source) => {
                self.state = ProcessState::RestartPending;
                tracing::error!(program = %self.program.display(), error = %source, "failed to start gateway");
                return Err(SupervisorError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                });
            }
        };

        let pid = child.id();
        let child = Arc::new(Mutex::new(child));

        diagnostics::spawn_drain(stderr, generation, self.events_tx.clone());
        let monitor = diagnostics::spawn_monitor(
            child.clone(),
            generation,
            self.poll_interval,
            self.events_tx.clone(),
        );

        self.process = Some(GatewayProcess {
            pid,
            child,
            transport: Transport::new(BufReader::new(stdout), stdin, self.request_timeout),
            monitor,
        });
        self.state = ProcessState::Running;
        tracing::info!(?pid, generation, program = %self.program.display(), "gateway started");
        Ok(())
    }

    /// The current process exited on its own.
    fn handle_exit(&mut self, code: Option<i32>, now: Instant) {
        if let Some(process) = self.process.take() {
            process.monitor.abort();
        }
        self.last_exit_code = code;
        self.state = ProcessState::RestartPending;
        let wait = self.failures.record_failure(now);
        tracing::warn!(
            ?code,
            failures = self.failures.failures(),
            backoff_secs = wait.as_secs(),
            "gateway exited unexpectedly"
        );
    }

    /// A call broke the channel: kill the process and count a failure.
    async fn fail(&mut self, error: &TransportError) {
        if let Some(process) = self.process.take() {
            self.last_exit_code = process.kill().await;
        }
        self.state = ProcessState::RestartPending;
        let wait = self.failures.record_failure(Instant::now());
        tracing::error!(
            error = %error,
            failures = self.failures.failures(),
            backoff_secs = wait.as_secs(),
            "gateway call failed, process killed"
        );
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("{name} was not captured"))
}
