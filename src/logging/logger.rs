// file: src/logging/logger.rs
// version: 2.0.0
// guid: 7a3c5e19-2b8d-4c6f-9e01-4d7b2a8f6c35

//! Logger initialization and configuration

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{AutoinstallError, Result};

/// Verbosity accepted in job requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verbosity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Verbosity {
    /// Tracing filter directive for this verbosity
    pub fn as_filter(self) -> &'static str {
        match self {
            Verbosity::Debug => "debug",
            Verbosity::Info => "info",
            Verbosity::Warning => "warn",
            Verbosity::Error | Verbosity::Critical => "error",
        }
    }
}

/// Initialize the logging system
pub fn init_logger(verbose: bool, quiet: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    init_with_filter(EnvFilter::new(level))
}

/// Initialize the logging system at a job's requested verbosity
pub fn init_logger_with_verbosity(verbosity: Verbosity) -> Result<()> {
    init_with_filter(EnvFilter::new(verbosity.as_filter()))
}

fn init_with_filter(filter: EnvFilter) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .map_err(|e| AutoinstallError::config(format!("Failed to initialize logger: {}", e)))
}

/// Initialize structured JSON logging (for services)
pub fn init_json_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .try_init()
        .map_err(|e| {
            AutoinstallError::config(format!("Failed to initialize JSON logger: {}", e))
        })
}

/// Run a future inside a named pipeline stage span
pub async fn with_async_operation_span<F, Fut, R>(operation: &str, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let span = tracing::info_span!("stage", name = operation);
    f().instrument(span).await
}
