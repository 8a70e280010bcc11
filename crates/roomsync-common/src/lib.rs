//! Roomsync Common Library
//!
//! Shared error types used by the Roomsync core and service crates.

pub mod error;

pub use error::{Result, SyncError};
