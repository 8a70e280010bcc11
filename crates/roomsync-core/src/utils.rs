//! Utility functions for Roomsync
//!
//! Timing helpers used to log store transitions, plus clock access.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::debug;

/// Log the start of an operation and return the start time
pub fn log_operation_start(operation: &str) -> Instant {
    debug!("🔧 Starting operation: {}", operation);
    Instant::now()
}

/// Log the end of an operation with duration
pub fn log_operation_end(operation: &str, start: Instant) {
    debug!("✅ Completed {} in {}", operation, format_duration(start.elapsed()));
}

/// Format a duration in a human-readable format
pub fn format_duration(duration: std::time::Duration) -> String {
    if duration.as_secs() < 60 {
        format!("{}ms", duration.as_millis())
    } else if duration.as_secs() < 3600 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}h {}m", duration.as_secs() / 3600, (duration.as_secs() % 3600) / 60)
    }
}

/// Get the current timestamp
pub fn get_timestamp() -> DateTime<Utc> {
    Utc::now()
}
