//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//!
//! - **Run logs (`io/run_log`)**: Per-run `analysis`, `process` and `status`
//!   files under `<log_dir>/history/`. Written whenever a log directory is
//!   given, unaffected by `RUST_LOG`.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::io::config::EngineConfig;

/// Install the global tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter` when it is unset.
/// Output: stderr, compact format. Fails if a subscriber is already set.
///
/// # Example
/// ```bash
/// RUST_LOG=stateflow=debug cargo test
/// ```
pub fn init(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter '{default_filter}'"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .context("install tracing subscriber")
}

/// [`init`] with the config's `log_filter`.
pub fn init_from_config(config: &EngineConfig) -> Result<()> {
    init(&config.log_filter)
}
