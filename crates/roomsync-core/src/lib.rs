//! Roomsync Core Library
//!
//! Client-side synchronization core: an in-memory model of rooms, members,
//! message history and read markers, kept consistent against out-of-order and
//! duplicate real-time delivery.
//!
//! # Features
//! - History merge with id de-duplication and timestamp ordering
//! - Placeholder rooms and pending messages reconciled with server answers
//! - Unread resolution from history and per-user read markers
//! - Validated real-time event application
//!
//! # Examples
//! ```rust
//! use roomsync_core::{HistorySource, Message, Room, RoomKind, SyncStore};
//! use chrono::Utc;
//!
//! let mut store = SyncStore::new("me");
//! store.upsert_room(Room::new("r1", RoomKind::Group, "Team"));
//! store.merge_history(
//!     &"r1".into(),
//!     vec![Message::text("m1", "r1", "alice", Utc::now(), "hi")],
//!     HistorySource::Realtime,
//! );
//! assert_eq!(store.resolve_last_unread(&"r1".into()), Some("m1".into()));
//! ```

pub mod config;
pub mod events;
pub mod placeholder;
pub mod store;
pub mod timeline;
pub mod traits;
pub mod types;
pub mod unread;
pub mod utils;

pub use config::{LoggingConfig, SyncConfig};
pub use events::{EventEffect, MembershipChange, RealtimeEvent};
pub use placeholder::{Confirmation, DeferredAction, PlaceholderRoom, RolledBackRoom};
pub use store::SyncStore;
pub use timeline::{MergeOutcome, Reconciled, Timeline};
pub use traits::{MessagingClient, RoomApi, SentMessage};
pub use types::{
    Attachment, HistorySource, Marker, Member, Message, MessageDraft, MessageId, MessageKind,
    Presence, Room, RoomId, RoomKind, UserId, PLACEHOLDER_PREFIX,
};
pub use unread::{ReadReceipt, RoomSummary};

pub use roomsync_common::{Result, SyncError};
