//! Collaborator traits for Roomsync
//!
//! The core never talks to the network itself. These traits are the seams
//! through which the service issues REST and messaging-protocol commands;
//! their implementations own transport framing, retries and timeouts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Attachment, Message, MessageId, Room, RoomId, UserId};
use roomsync_common::Result;

/// Server acknowledgement of a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Server-issued id; `None` when the server keeps the client id
    pub server_id: Option<MessageId>,
    /// Authoritative send time, when the server reports one
    pub timestamp: Option<DateTime<Utc>>,
}

/// REST collaborator
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Create (or fetch) the one-to-one room with `target`
    async fn create_room(&self, target: &UserId) -> Result<Room>;

    /// List every room the signed-in user belongs to
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    /// Upload an attachment into a room; returns the resulting message
    async fn send_attachment(
        &self,
        room_id: &RoomId,
        client_id: &MessageId,
        attachment: &Attachment,
    ) -> Result<Message>;
}

/// Real-time messaging protocol collaborator
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a text message tagged with its client correlation id
    async fn send_message(
        &self,
        room_id: &RoomId,
        client_id: &MessageId,
        body: &str,
    ) -> Result<SentMessage>;

    /// Publish the signed-in user's read marker
    async fn send_read_marker(&self, room_id: &RoomId, message_id: &MessageId) -> Result<()>;

    /// Fetch up to `limit` messages older than `before` (newest page when `None`)
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>>;
}
