//! Placeholder reconciliation
//!
//! Optimistic entities are created locally before the server knows about
//! them and reconciled once it answers:
//!
//! - a one-to-one room with a user who has no room yet lives under
//!   `placeholder-<target>` until the creation request returns;
//! - every message committed locally is `pending` under a client id until
//!   the send (or upload) is acknowledged or its echo arrives.
//!
//! Input committed against a placeholder room is queued as a
//! [`DeferredAction`] and handed back, retargeted at the real room, when the
//! placeholder is confirmed.

use tracing::{debug, info, instrument, warn};

use crate::store::SyncStore;
use crate::timeline::{Reconciled, Timeline};
use crate::traits::SentMessage;
use crate::types::{
    Attachment, Message, MessageDraft, MessageId, Room, RoomId, RoomKind, UserId,
};
use crate::utils::{get_timestamp, log_operation_end, log_operation_start};
use roomsync_common::{Result, SyncError};

/// Result of creating (or reusing) a placeholder room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRoom {
    pub room_id: RoomId,
    /// Pending messages created by this call
    pub message_ids: Vec<MessageId>,
    /// An outstanding placeholder already existed; no new creation request is needed
    pub reused: bool,
}

/// Send queued until the room it targets exists server-side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    SendText {
        room_id: RoomId,
        client_id: MessageId,
        body: String,
    },
    UploadAttachment {
        room_id: RoomId,
        client_id: MessageId,
        attachment: Attachment,
    },
}

impl DeferredAction {
    pub fn client_id(&self) -> &MessageId {
        match self {
            DeferredAction::SendText { client_id, .. }
            | DeferredAction::UploadAttachment { client_id, .. } => client_id,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            DeferredAction::SendText { room_id, .. }
            | DeferredAction::UploadAttachment { room_id, .. } => room_id,
        }
    }

    fn retarget(&mut self, target: &RoomId) {
        match self {
            DeferredAction::SendText { room_id, .. }
            | DeferredAction::UploadAttachment { room_id, .. } => *room_id = target.clone(),
        }
    }
}

/// Outstanding placeholder room and the input queued against it
#[derive(Debug, Clone)]
pub(crate) struct PendingRoom {
    pub(crate) room_id: RoomId,
    pub(crate) actions: Vec<DeferredAction>,
}

/// Attachment upload that has not completed
#[derive(Debug, Clone)]
pub(crate) struct PendingUpload {
    pub(crate) room_id: RoomId,
    pub(crate) attachment: Attachment,
}

/// What a failed placeholder room left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBackRoom {
    pub room: Room,
    /// Pending messages removed with it, for restoring the user's input
    pub discarded: Vec<Message>,
}

/// Server answer for a pending message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Send acknowledgement; the local entry becomes final
    Ack(SentMessage),
    /// Full server copy, e.g. the result of an attachment upload
    Delivered(Message),
}

impl SyncStore {
    /// Placeholder room currently outstanding for `target`.
    pub fn placeholder_room(&self, target: &UserId) -> Option<&RoomId> {
        self.placeholders.get(target).map(|pending| &pending.room_id)
    }

    /// Deferred actions queued against the placeholder for `target`.
    pub fn deferred_actions(&self, target: &UserId) -> &[DeferredAction] {
        self.placeholders
            .get(target)
            .map_or(&[], |pending| pending.actions.as_slice())
    }

    pub fn is_upload_active(&self, client_id: &MessageId) -> bool {
        self.uploads.contains_key(client_id)
    }

    /// Attachment of an upload that has not completed.
    pub fn active_upload(&self, client_id: &MessageId) -> Option<(&RoomId, &Attachment)> {
        self.uploads
            .get(client_id)
            .map(|upload| (&upload.room_id, &upload.attachment))
    }

    /// Opens a local one-to-one room with `target` before it exists server-side.
    ///
    /// Text and file become separate pending messages, each queued as a
    /// deferred action. A second call for the same target while the first is
    /// unresolved appends to the existing placeholder and reports `reused`.
    #[instrument(level = "debug", skip(self, text, file))]
    pub fn create_placeholder_room(
        &mut self,
        target: &UserId,
        text: Option<String>,
        file: Option<Attachment>,
    ) -> Result<PlaceholderRoom> {
        let start = log_operation_start("create_placeholder_room");
        if target.is_empty() {
            return Err(SyncError::InvalidState("placeholder target cannot be empty".into()));
        }
        if target == &self.own_user_id {
            return Err(SyncError::InvalidState("cannot open a direct room with yourself".into()));
        }
        if let Some(room) = self.direct_room_with(target) {
            return Err(SyncError::InvalidState(format!(
                "direct room {} with {} already exists",
                room.id, target
            )));
        }

        let reused = self.placeholders.contains_key(target);
        let room_id = match self.placeholders.get(target) {
            Some(pending) => pending.room_id.clone(),
            None => {
                let room_id = RoomId::placeholder_for(target);
                if let Some(stale) = self.redirects.remove(&room_id) {
                    debug!("Dropped redirect {} -> {}", room_id, stale);
                }
                let room = Room::new(room_id.clone(), RoomKind::OneToOne, target.as_str())
                    .with_member(self.own_user_id.clone(), true)
                    .with_member(target.clone(), false);
                self.rooms.insert(room_id.clone(), room);
                self.timelines
                    .insert(room_id.clone(), Timeline::new(room_id.clone()));
                self.placeholders.insert(
                    target.clone(),
                    PendingRoom {
                        room_id: room_id.clone(),
                        actions: Vec::new(),
                    },
                );
                info!("🔧 Opened placeholder room {}", room_id);
                room_id
            }
        };

        let mut message_ids = Vec::new();
        if let Some(body) = text.filter(|body| !body.trim().is_empty()) {
            message_ids.push(self.set_placeholder_message(&room_id, MessageDraft::text(body))?);
        }
        if let Some(file) = file {
            message_ids.push(self.set_placeholder_message(&room_id, MessageDraft::attachment(file))?);
        }

        if reused {
            debug!("Reused placeholder {} with {} new messages", room_id, message_ids.len());
        }
        log_operation_end("create_placeholder_room", start);
        Ok(PlaceholderRoom {
            room_id,
            message_ids,
            reused,
        })
    }

    /// Replaces the placeholder for `target` with the server's room.
    ///
    /// Every reference to the placeholder id moves to the real id. When the
    /// real room is already known its history absorbs the placeholder's.
    /// Returns the queued actions retargeted at the real room. Confirming a
    /// target without an outstanding placeholder only upserts the room.
    #[instrument(level = "debug", skip(self, room), fields(room_id = %room.id))]
    pub fn confirm_placeholder_room(
        &mut self,
        target: &UserId,
        room: Room,
    ) -> Result<Vec<DeferredAction>> {
        let start = log_operation_start("confirm_placeholder_room");
        if room.is_placeholder() || room.id.is_empty() {
            return Err(SyncError::InvalidState(format!(
                "{} is not a canonical room id",
                room.id
            )));
        }
        let Some(pending) = self.placeholders.remove(target) else {
            debug!("No outstanding placeholder for {}", target);
            self.upsert_room(room);
            return Ok(Vec::new());
        };

        let placeholder_id = pending.room_id;
        let real_id = room.id.clone();
        self.rooms.remove(&placeholder_id);

        if let Some(mut timeline) = self.timelines.remove(&placeholder_id) {
            match self.timelines.get_mut(&real_id) {
                Some(existing) => existing.absorb(timeline),
                None => {
                    timeline.rekey(real_id.clone());
                    self.timelines.insert(real_id.clone(), timeline);
                }
            }
        }
        self.upsert_room(room);

        for upload in self.uploads.values_mut() {
            if upload.room_id == placeholder_id {
                upload.room_id = real_id.clone();
            }
        }
        for canonical in self.redirects.values_mut() {
            if *canonical == placeholder_id {
                *canonical = real_id.clone();
            }
        }
        self.redirects.insert(placeholder_id.clone(), real_id.clone());

        let mut actions = pending.actions;
        for action in &mut actions {
            action.retarget(&real_id);
        }

        info!(
            "✅ Placeholder {} confirmed as {} with {} deferred actions",
            placeholder_id,
            real_id,
            actions.len()
        );
        log_operation_end("confirm_placeholder_room", start);
        Ok(actions)
    }

    /// Rolls back the placeholder for `target` after room creation failed.
    #[instrument(level = "debug", skip(self))]
    pub fn fail_placeholder_room(&mut self, target: &UserId) -> Option<RolledBackRoom> {
        let pending = self.placeholders.remove(target)?;
        let room_id = pending.room_id;
        let room = self.rooms.remove(&room_id)?;
        let discarded = self
            .timelines
            .remove(&room_id)
            .map(|timeline| timeline.messages().to_vec())
            .unwrap_or_default();
        self.uploads.retain(|_, upload| upload.room_id != room_id);
        warn!(
            "⚠️ Placeholder {} rolled back, {} pending messages discarded",
            room_id,
            discarded.len()
        );
        Some(RolledBackRoom { room, discarded })
    }

    /// Applies a room listing from the server.
    ///
    /// A one-to-one room whose other member has an outstanding placeholder
    /// confirms it; every other room is upserted. Returns the deferred
    /// actions released by confirmations.
    #[instrument(level = "debug", skip(self, rooms), fields(count = rooms.len()))]
    pub fn apply_room_list(&mut self, rooms: Vec<Room>) -> Result<Vec<DeferredAction>> {
        let mut released = Vec::new();
        for room in rooms {
            if room.id.is_empty() || room.is_placeholder() {
                warn!("⚠️ Ignoring listed room with id {:?}", room.id.as_str());
                continue;
            }
            let target = (room.kind == RoomKind::OneToOne)
                .then(|| {
                    room.members
                        .iter()
                        .map(|m| &m.user_id)
                        .find(|user| *user != &self.own_user_id && self.placeholders.contains_key(*user))
                        .cloned()
                })
                .flatten();
            match target {
                Some(target) => released.extend(self.confirm_placeholder_room(&target, room)?),
                None => {
                    self.upsert_room(room);
                }
            }
        }
        Ok(released)
    }

    /// Commits a draft against a room as a pending message.
    ///
    /// A draft carries either text or a single attachment. An attachment is
    /// registered as an active upload. Against a placeholder room the send is
    /// also queued as a deferred action.
    #[instrument(level = "debug", skip(self, draft))]
    pub fn set_placeholder_message(
        &mut self,
        room_id: &RoomId,
        draft: MessageDraft,
    ) -> Result<MessageId> {
        let room_id = self.canonical_room_id(room_id);
        if draft.is_empty() {
            return Err(SyncError::InvalidState("draft has neither text nor attachment".into()));
        }
        let body = draft.body.filter(|body| !body.trim().is_empty());
        if body.is_some() && draft.attachment.is_some() {
            return Err(SyncError::InvalidState(
                "text and attachment are committed as separate messages".into(),
            ));
        }
        if !self.rooms.contains_key(&room_id) {
            return Err(SyncError::RoomNotFound(room_id.to_string()));
        }

        let client_id = MessageId::generate();
        let mut message = Message::text(
            client_id.clone(),
            room_id.clone(),
            self.own_user_id.clone(),
            get_timestamp(),
            body.clone().unwrap_or_default(),
        );
        message.pending = true;
        message.reply_to = draft.reply_to;
        message.attachment = draft.attachment.clone();

        let action = match (body, draft.attachment) {
            (_, Some(attachment)) => {
                self.uploads.insert(
                    client_id.clone(),
                    PendingUpload {
                        room_id: room_id.clone(),
                        attachment: attachment.clone(),
                    },
                );
                DeferredAction::UploadAttachment {
                    room_id: room_id.clone(),
                    client_id: client_id.clone(),
                    attachment,
                }
            }
            (body, None) => DeferredAction::SendText {
                room_id: room_id.clone(),
                client_id: client_id.clone(),
                body: body.unwrap_or_default(),
            },
        };

        if let Some(target) = room_id.placeholder_target() {
            let Some(pending) = self.placeholders.get_mut(&target) else {
                return Err(SyncError::RoomNotFound(room_id.to_string()));
            };
            pending.actions.push(action);
        }

        self.timelines
            .entry(room_id.clone())
            .or_insert_with(|| Timeline::new(room_id.clone()))
            .append_local(message);
        debug!("Pending message {} added to {}", client_id, room_id);
        Ok(client_id)
    }

    /// Starts an attachment upload as a pending message.
    pub fn begin_upload(&mut self, room_id: &RoomId, attachment: Attachment) -> Result<MessageId> {
        self.set_placeholder_message(room_id, MessageDraft::attachment(attachment))
    }

    /// Reconciles a pending message with the server's answer.
    ///
    /// Returns `Ok(None)` when `client_id` no longer names a pending message
    /// (already confirmed, failed or cancelled); such late answers are ignored.
    #[instrument(level = "debug", skip(self, confirmation))]
    pub fn confirm_message(
        &mut self,
        room_id: &RoomId,
        client_id: &MessageId,
        confirmation: Confirmation,
    ) -> Result<Option<Reconciled>> {
        let room_id = self.canonical_room_id(room_id);
        let timeline = self
            .timelines
            .get_mut(&room_id)
            .ok_or_else(|| SyncError::RoomNotFound(room_id.to_string()))?;
        let Some(local) = timeline.get(client_id).filter(|m| m.pending) else {
            debug!("Ignoring late confirmation for {}", client_id);
            return Ok(None);
        };

        let confirmed = match confirmation {
            Confirmation::Ack(sent) => {
                let mut confirmed = local.clone();
                if let Some(server_id) = sent.server_id.filter(|id| !id.is_empty()) {
                    confirmed.id = server_id;
                }
                if let Some(timestamp) = sent.timestamp {
                    confirmed.timestamp = timestamp;
                }
                confirmed.origin_id = Some(client_id.clone());
                confirmed
            }
            Confirmation::Delivered(mut message) => {
                if message.id.is_empty() {
                    message.id = client_id.clone();
                }
                message.origin_id.get_or_insert_with(|| client_id.clone());
                message
            }
        };

        let result = timeline.reconcile_pending(client_id, confirmed);
        self.uploads.remove(client_id);
        if let Some(reconciled) = &result {
            debug!("✅ Pending {} reconciled as {}", client_id, reconciled.id());
        }
        Ok(result)
    }

    /// Removes a pending message whose send failed.
    #[instrument(level = "debug", skip(self))]
    pub fn fail_message(&mut self, room_id: &RoomId, client_id: &MessageId) -> Option<Message> {
        let room_id = self.canonical_room_id(room_id);
        self.discard_pending(&room_id, client_id)
            .inspect(|_| warn!("⚠️ Send of {} in {} failed, pending message removed", client_id, room_id))
    }

    /// Cancels an active upload and removes its pending message.
    ///
    /// Returns `None` when no upload is active for `client_id`.
    #[instrument(level = "debug", skip(self))]
    pub fn cancel_upload(&mut self, client_id: &MessageId) -> Option<Message> {
        let upload = self.uploads.remove(client_id)?;
        let removed = self.discard_pending(&upload.room_id, client_id);
        info!("Upload {} of {} cancelled", client_id, upload.attachment.name);
        removed
    }

    fn discard_pending(&mut self, room_id: &RoomId, client_id: &MessageId) -> Option<Message> {
        self.uploads.remove(client_id);
        if let Some(target) = room_id.placeholder_target() {
            if let Some(pending) = self.placeholders.get_mut(&target) {
                pending.actions.retain(|action| action.client_id() != client_id);
            }
        }
        let timeline = self.timelines.get_mut(room_id)?;
        if !timeline.get(client_id)?.pending {
            return None;
        }
        timeline.remove_message(client_id)
    }
}
