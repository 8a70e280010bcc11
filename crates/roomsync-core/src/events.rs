//! Inbound real-time events
//!
//! Events arrive from the messaging protocol and the push channel as tagged
//! JSON. Each one is validated before it touches the store; a malformed event
//! is logged and dropped with the model left as it was.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::placeholder::DeferredAction;
use crate::store::SyncStore;
use crate::timeline::MergeOutcome;
use crate::types::{HistorySource, Marker, Message, Presence, Room, RoomId, UserId};
use roomsync_common::{Result, SyncError};

/// Membership transition carried by a membership event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Joined,
    Left,
    Promoted,
    Demoted,
}

/// Real-time event as delivered by the transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    MessageReceived {
        message: Message,
    },
    HistoryBatch {
        room_id: RoomId,
        source: HistorySource,
        messages: Vec<Message>,
    },
    RoomMembershipChanged {
        room_id: RoomId,
        user_id: UserId,
        change: MembershipChange,
    },
    ReadMarkerReceived {
        marker: Marker,
    },
    PresenceChanged {
        user_id: UserId,
        presence: Presence,
    },
    RoomDestroyed {
        room_id: RoomId,
    },
    /// A room was created or changed server-side
    RoomUpdated {
        room: Room,
    },
}

/// What applying an event changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    Merged {
        room_id: RoomId,
        outcome: MergeOutcome,
    },
    MembershipUpdated {
        room_id: RoomId,
    },
    MarkerUpdated {
        room_id: RoomId,
    },
    PresenceUpdated {
        user_id: UserId,
    },
    RoomRemoved {
        room_id: RoomId,
    },
    /// Room upserted; confirming a placeholder may release deferred actions
    RoomUpserted {
        room_id: RoomId,
        released: Vec<DeferredAction>,
    },
    /// Valid, but refers to nothing the store knows about
    Ignored,
}

impl RealtimeEvent {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SyncError::InvalidEvent(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::MessageReceived { .. } => "message_received",
            RealtimeEvent::HistoryBatch { .. } => "history_batch",
            RealtimeEvent::RoomMembershipChanged { .. } => "room_membership_changed",
            RealtimeEvent::ReadMarkerReceived { .. } => "read_marker_received",
            RealtimeEvent::PresenceChanged { .. } => "presence_changed",
            RealtimeEvent::RoomDestroyed { .. } => "room_destroyed",
            RealtimeEvent::RoomUpdated { .. } => "room_updated",
        }
    }

    /// Checks the identifiers an event needs before it can be applied.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| Err(SyncError::InvalidEvent(format!("{} without {}", self.kind(), what)));
        match self {
            RealtimeEvent::MessageReceived { message } => {
                if message.id.is_empty() {
                    return missing("message id");
                }
                if message.room_id.is_empty() {
                    return missing("room id");
                }
                if message.sender.is_empty() {
                    return missing("sender");
                }
            }
            RealtimeEvent::HistoryBatch { room_id, .. } | RealtimeEvent::RoomDestroyed { room_id } => {
                if room_id.is_empty() {
                    return missing("room id");
                }
            }
            RealtimeEvent::RoomMembershipChanged { room_id, user_id, .. } => {
                if room_id.is_empty() {
                    return missing("room id");
                }
                if user_id.is_empty() {
                    return missing("user id");
                }
            }
            RealtimeEvent::ReadMarkerReceived { marker } => {
                if marker.room_id.is_empty() || marker.user_id.is_empty() {
                    return missing("room or user id");
                }
                if marker.message_id.is_empty() {
                    return missing("message id");
                }
            }
            RealtimeEvent::PresenceChanged { user_id, .. } => {
                if user_id.is_empty() {
                    return missing("user id");
                }
            }
            RealtimeEvent::RoomUpdated { room } => {
                if room.id.is_empty() || room.is_placeholder() {
                    return missing("canonical room id");
                }
            }
        }
        Ok(())
    }
}

impl SyncStore {
    /// Validates and applies one real-time event as a single transition.
    #[instrument(level = "debug", skip(self, event), fields(kind = event.kind()))]
    pub fn apply_event(&mut self, event: RealtimeEvent) -> Result<EventEffect> {
        if let Err(e) = event.validate() {
            warn!("⚠️ Dropping malformed event: {}", e);
            return Err(e);
        }

        let effect = match event {
            RealtimeEvent::MessageReceived { message } => {
                let room_id = self.canonical_room_id(&message.room_id);
                let outcome = self.merge_history(&room_id, vec![message], HistorySource::Realtime);
                EventEffect::Merged { room_id, outcome }
            }
            RealtimeEvent::HistoryBatch {
                room_id,
                source,
                messages,
            } => {
                let room_id = self.canonical_room_id(&room_id);
                let outcome = self.merge_history(&room_id, messages, source);
                EventEffect::Merged { room_id, outcome }
            }
            RealtimeEvent::RoomMembershipChanged {
                room_id,
                user_id,
                change,
            } => self.apply_membership_change(room_id, user_id, change),
            RealtimeEvent::ReadMarkerReceived { marker } => {
                let room_id = self.canonical_room_id(&marker.room_id);
                match self.update_markers(&room_id, vec![marker]) {
                    0 => EventEffect::Ignored,
                    _ => EventEffect::MarkerUpdated { room_id },
                }
            }
            RealtimeEvent::PresenceChanged { user_id, presence } => {
                self.set_presence(user_id.clone(), presence);
                EventEffect::PresenceUpdated { user_id }
            }
            RealtimeEvent::RoomDestroyed { room_id } => {
                let room_id = self.canonical_room_id(&room_id);
                match self.remove_room(&room_id) {
                    Some(_) => EventEffect::RoomRemoved { room_id },
                    None => EventEffect::Ignored,
                }
            }
            RealtimeEvent::RoomUpdated { room } => {
                let room_id = room.id.clone();
                let released = self.apply_room_list(vec![room])?;
                EventEffect::RoomUpserted { room_id, released }
            }
        };
        debug!(?effect, "Event applied");
        Ok(effect)
    }

    /// Parses and applies one JSON-encoded event.
    pub fn apply_raw_event(&mut self, raw: &str) -> Result<EventEffect> {
        let event = RealtimeEvent::from_json(raw).inspect_err(|e| {
            warn!("⚠️ Dropping undecodable event: {}", e);
        })?;
        self.apply_event(event)
    }

    fn apply_membership_change(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        change: MembershipChange,
    ) -> EventEffect {
        let room_id = self.canonical_room_id(&room_id);
        if change == MembershipChange::Left && user_id == self.own_user_id {
            return match self.remove_room(&room_id) {
                Some(_) => EventEffect::RoomRemoved { room_id },
                None => EventEffect::Ignored,
            };
        }
        let Some(room) = self.rooms.get(&room_id) else {
            debug!("Membership change for unknown room {}", room_id);
            return EventEffect::Ignored;
        };
        let was_owner = room
            .members
            .iter()
            .any(|m| m.user_id == user_id && m.is_owner);

        let applied = match change {
            MembershipChange::Joined => self.apply_membership(&room_id, user_id, true, was_owner),
            MembershipChange::Left => self.apply_membership(&room_id, user_id, false, false),
            MembershipChange::Promoted => self.apply_membership(&room_id, user_id, true, true),
            MembershipChange::Demoted => self.apply_membership(&room_id, user_id, true, false),
        };
        if applied {
            EventEffect::MembershipUpdated { room_id }
        } else {
            EventEffect::Ignored
        }
    }
}
