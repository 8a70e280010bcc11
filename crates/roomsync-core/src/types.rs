//! Core types for Roomsync
//!
//! This module defines the room, member, message and marker model shared by
//! the unread engine, the placeholder reconciler and the history merge.
//! Identifiers are transparent string newtypes so that server-issued ids and
//! client-generated ids flow through the same code paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by every locally synthesized one-to-one room id.
pub const PLACEHOLDER_PREFIX: &str = "placeholder-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new<T: Into<String>>(id: T) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// A user identifier as issued by the backend.
    UserId
}

string_id! {
    /// A room identifier. Either canonical (server-issued) or a placeholder
    /// of the form `placeholder-<targetUserId>`.
    RoomId
}

string_id! {
    /// A message identifier. Either a client-generated UUID for an optimistic
    /// message or the server-issued stanza id once confirmed.
    MessageId
}

impl RoomId {
    /// Placeholder id for a one-to-one room with `target` that does not exist
    /// server-side yet.
    pub fn placeholder_for(target: &UserId) -> Self {
        Self(format!("{PLACEHOLDER_PREFIX}{target}"))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Target user a placeholder id was synthesized for.
    pub fn placeholder_target(&self) -> Option<UserId> {
        self.0
            .strip_prefix(PLACEHOLDER_PREFIX)
            .filter(|target| !target.is_empty())
            .map(UserId::from)
    }
}

impl MessageId {
    /// Fresh client-side id for an optimistic message.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Conversation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Direct conversation between two users
    OneToOne,
    /// Named group conversation
    Group,
    /// Temporary room attached to a meeting
    Meeting,
}

/// Room membership entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub room_id: RoomId,
    #[serde(default)]
    pub is_owner: bool,
}

/// A conversation container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Room {
    pub fn new(id: impl Into<RoomId>, kind: RoomKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Builder-style member insertion
    pub fn with_member(mut self, user_id: impl Into<UserId>, is_owner: bool) -> Self {
        self.upsert_member(user_id.into(), is_owner);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_placeholder()
    }

    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.members.iter().any(|m| &m.user_id == user_id)
    }

    /// Adds the member or updates its ownership flag.
    pub fn upsert_member(&mut self, user_id: UserId, is_owner: bool) {
        match self.members.iter_mut().find(|m| m.user_id == user_id) {
            Some(member) => member.is_owner = is_owner,
            None => self.members.push(Member {
                user_id,
                room_id: self.id.clone(),
                is_owner,
            }),
        }
    }

    /// Removes the member, returning whether it was present.
    pub fn remove_member(&mut self, user_id: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| &m.user_id != user_id);
        before != self.members.len()
    }

    /// Moves the room and its membership to a new id.
    pub fn rekey(&mut self, id: RoomId) {
        for member in &mut self.members {
            member.room_id = id.clone();
        }
        self.id = id;
    }
}

/// Message type discriminator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// User-authored text (possibly with an attachment)
    Text,
    /// System or room-configuration notice
    System,
    /// Anything else the protocol carries (calls, reactions, ...)
    Other(String),
}

/// File reference attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Remote location, known once the upload completed
    #[serde(default)]
    pub uri: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            uri: None,
        }
    }
}

/// A unit of a room's ordered history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    /// Set while the message only exists locally
    #[serde(default)]
    pub pending: bool,
    /// Client correlation id echoed back by the server
    #[serde(default)]
    pub origin_id: Option<MessageId>,
}

impl Message {
    pub fn text(
        id: impl Into<MessageId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            timestamp,
            kind: MessageKind::Text,
            body: body.into(),
            attachment: None,
            reply_to: None,
            pending: false,
            origin_id: None,
        }
    }

    pub fn system(
        id: impl Into<MessageId>,
        room_id: impl Into<RoomId>,
        sender: impl Into<UserId>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind: MessageKind::System,
            ..Self::text(id, room_id, sender, timestamp, body)
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<MessageId>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_origin_id(mut self, origin_id: impl Into<MessageId>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    /// Whether this message can mark the room unread for `viewer`.
    ///
    /// System notices always count; text only counts when someone else wrote it.
    pub fn counts_as_unread_for(&self, viewer: &UserId) -> bool {
        match &self.kind {
            MessageKind::System => true,
            MessageKind::Text => &self.sender != viewer,
            MessageKind::Other(_) => false,
        }
    }
}

/// Per-room, per-user pointer to the last message acknowledged as read.
///
/// `message_id` and `timestamp` are only ever replaced together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
}

impl Marker {
    pub fn new(
        room_id: impl Into<RoomId>,
        user_id: impl Into<UserId>,
        message_id: impl Into<MessageId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            message_id: message_id.into(),
            timestamp,
        }
    }

    /// Marker for `user_id` pointing at `message`.
    pub fn at(message: &Message, user_id: UserId) -> Self {
        Self {
            room_id: message.room_id.clone(),
            user_id,
            message_id: message.id.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Where a batch of messages came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    /// Initial inbox sync at session start
    InitialInbox,
    /// Older page fetched on demand
    PaginatedHistory,
    /// Live delivery from the messaging protocol
    Realtime,
}

/// User availability as reported by the messaging protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    Away,
    Busy,
    Offline,
}

/// User input committed against a room before the server confirmed it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub body: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
}

impl MessageDraft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            attachment: Some(attachment),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.as_deref().map_or(true, |b| b.trim().is_empty()) && self.attachment.is_none()
    }
}
