//! Failure accounting and restart backoff.

use std::time::{Duration, Instant};

/// Ceiling on the restart wait.
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Restart wait after `failures` consecutive failures: `min(300, 2^failures)`.
pub fn backoff_secs(failures: u32) -> u64 {
    2u64.checked_pow(failures)
        .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS))
}

/// Counts unexpected exits and gates restarts.
///
/// All methods take `now` explicitly so the state machine can be driven
/// deterministically.
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    failures: u32,
    backoff_until: Option<Instant>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one unexpected exit and return the new wait.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let wait = Duration::from_secs(backoff_secs(self.failures));
        self.backoff_until = Some(now + wait);
        wait
    }

    /// Time left before a restart is allowed, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff_until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.remaining(now).is_some()
    }

    /// Operator restart: forget all failures.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.backoff_until = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn backoff_until(&self) -> Option<Instant> {
        self.backoff_until
    }
}
