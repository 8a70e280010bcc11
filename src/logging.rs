//! Tracing subscriber setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use roomsync_common::{Result, SyncError};
use roomsync_core::LoggingConfig;

/// Filter used when neither `RUST_LOG` nor the configured level parses
const FALLBACK_FILTER: &str = "warn";

/// Builds the filter: `RUST_LOG` first, then `level_override`, then the configured level.
pub fn env_filter(config: &LoggingConfig, level_override: Option<&str>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = level_override.unwrap_or(&config.level);
    match EnvFilter::try_new(level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid log level {level:?} ({e}), falling back to {FALLBACK_FILTER}");
            EnvFilter::new(FALLBACK_FILTER)
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let filter = env_filter(config, level_override);
    let registry = Registry::default().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()
    };
    installed.map_err(|e| SyncError::Internal(format!("failed to install tracing subscriber: {e}")))
}
