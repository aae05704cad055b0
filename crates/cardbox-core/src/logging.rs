//! Tracing setup for embedding applications
//!
//! The engine crates only emit `tracing` events; installing a subscriber
//! is the host application's call. This helper wires one up from
//! [`LoggingConfig`], honouring `RUST_LOG` when set.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. With `file` set, output is
/// appended there instead of stderr. Calling this twice fails, as only
/// one global subscriber can exist.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_writer(file)
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
        }
    }
    Ok(())
}
