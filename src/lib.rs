//! Roomsync
//!
//! Async driver for the Roomsync synchronization core. [`SyncService`] runs
//! the core's transitions against REST and messaging collaborators; the
//! [`config`] and [`logging`] modules bootstrap the binary.
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//! use roomsync::{config, SyncService};
//! # use roomsync_core::{MessagingClient, RoomApi};
//! # async fn example<A: RoomApi, M: MessagingClient>(api: A, messaging: M) -> roomsync_common::Result<()> {
//! let config = config::load(None)?;
//! let service = SyncService::new(config, Arc::new(api), Arc::new(messaging));
//! service.sync_rooms().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod service;

pub use service::SyncService;
