//! Configuration loading
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! then `ROOMSYNC_`-prefixed environment variables. Nested tables are
//! addressed from the environment as `ROOMSYNC_<TABLE>_<KEY>`, for example
//! `ROOMSYNC_LOGGING_LEVEL=debug`.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
    Figment,
};
use tracing::{debug, info, instrument};

use roomsync_common::{Result, SyncError};
use roomsync_core::SyncConfig;

const ENV_PREFIX: &str = "ROOMSYNC_";

static SUB_TABLES: [&str; 1] = ["logging"];

/// Builds the layered figment without extracting it.
pub fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(
        Env::prefixed(ENV_PREFIX)
            .ignore(&["config"])
            .map(|k| env_key(k.as_str())),
    )
}

/// Loads and validates the effective configuration.
#[instrument(level = "debug")]
pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(SyncError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }
        info!("📁 Using configuration file: {}", path.display());
    }
    let config: SyncConfig = figment(path)
        .extract()
        .map_err(|e| SyncError::Config(e.to_string()))?;
    config.validate()?;
    debug!("✅ Configuration loaded for {}", config.own_user_id);
    Ok(config)
}

/// Maps `logging_level` to `logging.level`; other keys pass through.
fn env_key(key: &str) -> Uncased<'static> {
    let key = key.to_ascii_lowercase();
    for table in SUB_TABLES {
        if let Some(rest) = key.strip_prefix(table).and_then(|k| k.strip_prefix('_')) {
            return Uncased::from(format!("{table}.{rest}"));
        }
    }
    Uncased::from(key)
}
