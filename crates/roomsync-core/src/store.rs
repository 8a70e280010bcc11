//! Room, history and marker state container
//!
//! [`SyncStore`] is the single owner of the room/message/marker model. Views
//! and transports read through its query methods and change it only through
//! its command methods, each of which is one synchronous, atomic transition.
//! Placeholder reconciliation, unread resolution and event application extend
//! this type from their own modules.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::placeholder::{PendingRoom, PendingUpload};
use crate::timeline::{MergeOutcome, Timeline};
use crate::types::{
    HistorySource, Marker, Message, MessageId, Presence, Room, RoomId, RoomKind, UserId,
};
use crate::utils::{log_operation_end, log_operation_start};

/// In-memory synchronization model
#[derive(Debug)]
pub struct SyncStore {
    pub(crate) own_user_id: UserId,
    pub(crate) rooms: HashMap<RoomId, Room>,
    pub(crate) timelines: HashMap<RoomId, Timeline>,
    /// Outstanding placeholder rooms keyed by target user
    pub(crate) placeholders: HashMap<UserId, PendingRoom>,
    /// Attachment uploads in flight keyed by client message id
    pub(crate) uploads: HashMap<MessageId, PendingUpload>,
    /// Placeholder ids that were confirmed, mapped to their canonical room
    pub(crate) redirects: HashMap<RoomId, RoomId>,
    pub(crate) presence: HashMap<UserId, Presence>,
}

impl SyncStore {
    pub fn new(own_user_id: impl Into<UserId>) -> Self {
        Self {
            own_user_id: own_user_id.into(),
            rooms: HashMap::new(),
            timelines: HashMap::new(),
            placeholders: HashMap::new(),
            uploads: HashMap::new(),
            redirects: HashMap::new(),
            presence: HashMap::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.own_user_id.clone())
    }

    pub fn own_user_id(&self) -> &UserId {
        &self.own_user_id
    }

    /// Maps a confirmed placeholder id to its canonical room id.
    pub fn canonical_room_id(&self, room_id: &RoomId) -> RoomId {
        self.resolve(room_id).clone()
    }

    fn resolve<'a>(&'a self, room_id: &'a RoomId) -> &'a RoomId {
        self.redirects.get(room_id).unwrap_or(room_id)
    }

    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(self.resolve(room_id))
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn timeline(&self, room_id: &RoomId) -> Option<&Timeline> {
        self.timelines.get(self.resolve(room_id))
    }

    /// Message history of a room; empty when nothing is known about it.
    pub fn messages(&self, room_id: &RoomId) -> &[Message] {
        self.timeline(room_id).map(Timeline::messages).unwrap_or(&[])
    }

    pub fn message(&self, room_id: &RoomId, message_id: &MessageId) -> Option<&Message> {
        self.timeline(room_id)?.get(message_id)
    }

    pub fn marker(&self, room_id: &RoomId, user_id: &UserId) -> Option<&Marker> {
        self.timeline(room_id)?.marker(user_id)
    }

    pub fn presence(&self, user_id: &UserId) -> Option<Presence> {
        self.presence.get(user_id).copied()
    }

    /// Canonical one-to-one room shared with `target`, if one is known.
    pub fn direct_room_with(&self, target: &UserId) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.kind == RoomKind::OneToOne && !room.is_placeholder() && room.has_member(target))
    }

    /// Inserts or replaces a room received from the server.
    ///
    /// Returns `true` when the room was not known before.
    #[instrument(level = "debug", skip(self, room), fields(room_id = %room.id))]
    pub fn upsert_room(&mut self, room: Room) -> bool {
        let id = room.id.clone();
        self.timelines
            .entry(id.clone())
            .or_insert_with(|| Timeline::new(id.clone()));
        let created = self.rooms.insert(id, room).is_none();
        if created {
            debug!("Room added");
        }
        created
    }

    /// Destroys a room together with its history, markers and uploads.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_room(&mut self, room_id: &RoomId) -> Option<Room> {
        let start = log_operation_start("remove_room");
        let room = self.rooms.remove(room_id);
        self.timelines.remove(room_id);
        self.uploads.retain(|_, upload| &upload.room_id != room_id);
        if let Some(target) = room_id.placeholder_target() {
            self.placeholders.remove(&target);
        }
        self.redirects.retain(|_, canonical| *canonical != *room_id);
        if room.is_some() {
            info!("🗑️ Room {} destroyed", room_id);
        }
        log_operation_end("remove_room", start);
        room
    }

    /// Merges a batch of messages into a room's history.
    ///
    /// History for a room that has not been listed yet is kept so that it is
    /// in place once the room arrives. Messages addressed to a placeholder id
    /// nobody owns are dropped.
    #[instrument(level = "debug", skip(self, incoming), fields(count = incoming.len()))]
    pub fn merge_history(
        &mut self,
        room_id: &RoomId,
        incoming: Vec<Message>,
        source: HistorySource,
    ) -> MergeOutcome {
        let start = log_operation_start("merge_history");
        let room_id = self.canonical_room_id(room_id);
        if room_id.is_placeholder() && !self.timelines.contains_key(&room_id) {
            warn!("⚠️ Dropping {} messages for unknown placeholder {}", incoming.len(), room_id);
            return MergeOutcome {
                dropped: incoming.len(),
                ..Default::default()
            };
        }

        let incoming: Vec<Message> = incoming
            .into_iter()
            .map(|mut message| {
                message.room_id = self.canonical_room_id(&message.room_id);
                message
            })
            .collect();
        let outcome = self
            .timelines
            .entry(room_id.clone())
            .or_insert_with(|| Timeline::new(room_id.clone()))
            .merge(incoming, source);

        for message_id in self.settled_uploads(&room_id) {
            self.uploads.remove(&message_id);
        }

        debug!(?outcome, "Merged {:?} batch into {}", source, room_id);
        log_operation_end("merge_history", start);
        outcome
    }

    /// Replaces read markers of a room. Returns how many were applied.
    #[instrument(level = "debug", skip(self, incoming))]
    pub fn update_markers(&mut self, room_id: &RoomId, incoming: Vec<Marker>) -> usize {
        let room_id = self.canonical_room_id(room_id);
        let incoming: Vec<Marker> = incoming
            .into_iter()
            .map(|mut marker| {
                marker.room_id = self.canonical_room_id(&marker.room_id);
                marker
            })
            .collect();
        let applied = self
            .timelines
            .entry(room_id.clone())
            .or_insert_with(|| Timeline::new(room_id.clone()))
            .update_markers(incoming);
        debug!("Applied {} markers in {}", applied, room_id);
        applied
    }

    /// Adds, removes or re-flags a member. Returns `false` for unknown rooms.
    pub fn apply_membership(&mut self, room_id: &RoomId, user_id: UserId, joined: bool, is_owner: bool) -> bool {
        let room_id = self.canonical_room_id(room_id);
        let Some(room) = self.rooms.get_mut(&room_id) else {
            debug!("Membership change for unknown room {}", room_id);
            return false;
        };
        if joined {
            room.upsert_member(user_id, is_owner);
            true
        } else {
            room.remove_member(&user_id)
        }
    }

    pub fn set_presence(&mut self, user_id: UserId, presence: Presence) -> Option<Presence> {
        self.presence.insert(user_id, presence)
    }

    /// Upload associations whose message is no longer pending.
    fn settled_uploads(&self, room_id: &RoomId) -> Vec<MessageId> {
        self.uploads
            .iter()
            .filter(|(_, upload)| &upload.room_id == room_id)
            .filter(|(id, _)| {
                self.message(room_id, id)
                    .map_or(true, |message| !message.pending)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}
