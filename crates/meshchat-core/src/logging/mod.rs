//! Tracing setup shared by the CLI and embedders
//!
//! Console output goes to stderr through `tracing_subscriber::fmt` filtered by
//! `RUST_LOG` (falling back to the level passed in). A [`JsonlLayer`] can be
//! stacked on top to keep one machine-readable file per device:
//!
//! ```text
//! <log_dir>/2026-10-16_alice-laptop.jsonl
//! ```
//!
//! ```ignore
//! meshchat_core::logging::LoggingBuilder::new("info")
//!     .with_jsonl("./logs", "alice-laptop")
//!     .init()?;
//! ```

mod layer;

use std::path::PathBuf;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub use layer::{JsonlLayer, LogLine};

/// Console logging at `level` unless `RUST_LOG` says otherwise.
///
/// Returns false if a global subscriber was already installed.
pub fn init(level: &str) -> bool {
    LoggingBuilder::new(level).init().unwrap_or(false)
}

pub struct LoggingBuilder {
    level: String,
    jsonl: Option<(PathBuf, String)>,
    console: bool,
}

impl LoggingBuilder {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            jsonl: None,
            console: true,
        }
    }

    /// Also append every event to `<dir>/<date>_<device>.jsonl`.
    pub fn with_jsonl(mut self, dir: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        self.jsonl = Some((dir.into(), device.into()));
        self
    }

    pub fn no_console(mut self) -> Self {
        self.console = false;
        self
    }

    /// Install the global subscriber.
    ///
    /// `Ok(false)` means another subscriber was installed first.
    pub fn init(self) -> std::io::Result<bool> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let jsonl = match &self.jsonl {
            Some((dir, device)) => Some(JsonlLayer::new(dir, device)?),
            None => None,
        };
        let console = self
            .console
            .then(|| {
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
            });

        Ok(tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(jsonl)
            .try_init()
            .is_ok())
    }
}
