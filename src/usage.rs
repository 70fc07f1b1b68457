//! Token usage and cost accounting.
//!
//! Aggregate counters persist as a small JSON document:
//!
//! ```json
//! {"input": 1200, "output": 340, "total_cost": 0.000192}
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::transport::protocol::Usage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
}

/// Approximate list prices, keyed by model name without the `models/` prefix.
const PRICING: &[(&str, Pricing)] = &[
    ("gemini-1.5-flash", Pricing { input: 0.075, output: 0.30 }),
    ("gemini-1.5-pro", Pricing { input: 3.50, output: 10.50 }),
    ("gemini-pro", Pricing { input: 0.50, output: 1.50 }),
];

/// Price list entry for `model`, with or without the `models/` prefix.
pub fn pricing(model: &str) -> Option<Pricing> {
    let name = model.strip_prefix("models/").unwrap_or(model);
    PRICING
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, price)| *price)
}

/// Estimated cost in USD. Unknown models cost nothing.
pub fn cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    pricing(model).map_or(0.0, |price| {
        input_tokens as f64 / 1_000_000.0 * price.input
            + output_tokens as f64 / 1_000_000.0 * price.output
    })
}

/// Token counters and accumulated cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub input: u64,
    pub output: u64,
    pub total_cost: f64,
}

impl UsageStats {
    /// Read stats from `path`. A missing or unreadable file counts as zero.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read usage stats, starting from zero");
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "corrupt usage stats, starting from zero");
            Self::default()
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string(self)?)
    }

    /// Add one call's tokens and return its cost.
    pub fn add(&mut self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let call_cost = cost(model, input_tokens, output_tokens);
        self.input += input_tokens;
        self.output += output_tokens;
        self.total_cost += call_cost;
        call_cost
    }
}

/// Session counters plus the persisted all-time totals.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    session: UsageStats,
    global: UsageStats,
    path: Option<PathBuf>,
}

impl UsageLedger {
    /// Ledger whose totals live in `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            session: UsageStats::default(),
            global: UsageStats::load(&path),
            path: Some(path),
        }
    }

    /// Ledger that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Count one generation call in both the session and the totals, and
    /// persist the totals. A failed write is logged, not returned.
    pub fn record(&mut self, usage: &Usage) -> f64 {
        let call_cost = self
            .session
            .add(&usage.model, usage.input_tokens, usage.output_tokens);
        self.global
            .add(&usage.model, usage.input_tokens, usage.output_tokens);

        if let Some(path) = &self.path {
            if let Err(e) = self.global.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to save usage stats");
            }
        }
        call_cost
    }

    pub fn session(&self) -> &UsageStats {
        &self.session
    }

    pub fn global(&self) -> &UsageStats {
        &self.global
    }
}
