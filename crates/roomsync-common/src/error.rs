//! Error types for Roomsync
//!
//! This module defines the error taxonomy shared by the synchronization core
//! and the service layer. Transport failures are surfaced as `Network` and are
//! retryable; ambiguous local state and duplicate delivery never become errors.

use std::io;
use thiserror::Error;

/// Roomsync error types
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient transport failure reported by a collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Room is not present in the local model
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Message is not present in the room's sequence
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Inbound event failed validation and was dropped
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Operation is not valid for the current model state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Operation was cancelled before it completed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for Roomsync operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

impl SyncError {
    /// Whether the caller may retry the command that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        match self {
            SyncError::Network(msg) => tracing::warn!("⚠️ Network error: {}", msg),
            SyncError::InvalidEvent(msg) => tracing::warn!("⚠️ Dropped invalid event: {}", msg),
            SyncError::Cancelled(msg) => tracing::debug!("Operation cancelled: {}", msg),
            other => tracing::error!("❌ {}", other),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
