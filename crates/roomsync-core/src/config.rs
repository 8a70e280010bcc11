//! Configuration module for Roomsync
//!
//! This module defines the configuration consumed by the synchronization core
//! and the service that drives it. The service loads it through figment; the
//! JSON helpers here cover tooling and tests.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::UserId;
use roomsync_common::{Result, SyncError};

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Id of the signed-in user; drives unread resolution and placeholder authorship
    pub own_user_id: UserId,

    /// Number of messages requested per older-history page
    pub history_page_size: usize,

    /// Whether viewing a room emits read markers to the messaging protocol
    pub send_read_receipts: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            own_user_id: UserId::new(""),
            history_page_size: 50,
            send_read_receipts: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration for the given signed-in user
    pub fn new(own_user_id: impl Into<UserId>) -> Self {
        Self {
            own_user_id: own_user_id.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)
            .map_err(|e| SyncError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.own_user_id.is_empty() {
            return Err(SyncError::Config("own_user_id cannot be empty".into()));
        }
        if self.history_page_size == 0 {
            return Err(SyncError::Config("history_page_size must be positive".into()));
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(SyncError::Config(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}
