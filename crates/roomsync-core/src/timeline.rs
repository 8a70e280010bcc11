//! Per-room history and read-marker merge
//!
//! A [`Timeline`] owns one room's ordered message sequence and the read
//! markers that point into it. Every mutation of the sequence goes through
//! this type so that the two invariants hold after each call:
//!
//! - no two entries share an id, ordering is by timestamp ascending and ties
//!   keep arrival order;
//! - markers follow messages whose ids are rewritten or removed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::types::{HistorySource, Marker, Message, MessageId, RoomId, UserId};

/// Counters describing what a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Messages with a previously unknown id
    pub inserted: usize,
    /// Messages that overwrote an entry with the same id
    pub updated: usize,
    /// Server copies that replaced a pending local entry
    pub reconciled: usize,
    /// Messages rejected by validation
    pub dropped: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.reconciled > 0
    }
}

/// Result of replacing a pending entry with its confirmed counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The pending entry was rewritten in place
    Replaced { previous_id: MessageId, id: MessageId },
    /// The confirmed id was already present; the pending entry was folded into it
    Folded { previous_id: MessageId, id: MessageId },
}

impl Reconciled {
    pub fn id(&self) -> &MessageId {
        match self {
            Reconciled::Replaced { id, .. } | Reconciled::Folded { id, .. } => id,
        }
    }
}

/// Ordered message history and read markers of a single room
#[derive(Debug, Clone)]
pub struct Timeline {
    room_id: RoomId,
    messages: Vec<Message>,
    markers: HashMap<UserId, Marker>,
}

impl Timeline {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            messages: Vec::new(),
            markers: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn earliest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.pending)
    }

    pub fn marker(&self, user_id: &UserId) -> Option<&Marker> {
        self.markers.get(user_id)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    /// Merges a batch of authoritative messages into the sequence.
    ///
    /// Known ids are overwritten in place, echoes of local sends (matched
    /// through `origin_id`) replace the local entry, and new ids are inserted
    /// in timestamp order. Older history pages are prepended as one block.
    /// Applying the same batch twice leaves the sequence unchanged.
    pub fn merge(&mut self, incoming: Vec<Message>, source: HistorySource) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut fresh: Vec<Message> = Vec::new();

        for mut message in incoming {
            if message.room_id != self.room_id {
                warn!(
                    "⚠️ Dropping message {} addressed to {} from {} merge",
                    message.id, message.room_id, self.room_id
                );
                outcome.dropped += 1;
                continue;
            }
            if message.id.is_empty() || message.sender.is_empty() {
                warn!("⚠️ Dropping message without id or sender in {}", self.room_id);
                outcome.dropped += 1;
                continue;
            }
            message.pending = false;

            if let Some(index) = self.position(&message.id) {
                trace!("Overwriting {} in place", message.id);
                self.place_existing(index, message);
                outcome.updated += 1;
                continue;
            }

            if let Some(origin_id) = message.origin_id.clone() {
                if self.position(&origin_id).is_some() {
                    if self.replace_entry(&origin_id, message).is_some() {
                        outcome.reconciled += 1;
                    }
                    continue;
                }
            }

            match fresh.iter_mut().find(|m| m.id == message.id) {
                Some(duplicate) => {
                    *duplicate = message;
                    outcome.updated += 1;
                }
                None => fresh.push(message),
            }
        }

        // Stable: server order survives timestamp ties.
        fresh.sort_by_key(|m| m.timestamp);
        outcome.inserted = fresh.len();

        let prepend = source == HistorySource::PaginatedHistory
            && match (fresh.last(), self.earliest()) {
                (Some(newest), Some(earliest)) => newest.timestamp <= earliest.timestamp,
                _ => false,
            };

        if prepend {
            debug!("Prepending {} older messages to {}", fresh.len(), self.room_id);
            self.messages.splice(0..0, fresh);
        } else {
            for message in fresh {
                self.insert_ordered(message);
            }
        }

        outcome
    }

    /// Replaces markers per `(room, user)` pair. Returns how many were applied.
    pub fn update_markers(&mut self, incoming: impl IntoIterator<Item = Marker>) -> usize {
        let mut applied = 0;
        for marker in incoming {
            if marker.room_id != self.room_id {
                warn!(
                    "⚠️ Dropping marker for {} addressed to {} from {} merge",
                    marker.user_id, marker.room_id, self.room_id
                );
                continue;
            }
            if marker.user_id.is_empty() || marker.message_id.is_empty() {
                warn!("⚠️ Dropping incomplete marker in {}", self.room_id);
                continue;
            }
            self.markers.insert(marker.user_id.clone(), marker);
            applied += 1;
        }
        applied
    }

    /// Replaces one marker, returning the one it superseded.
    pub fn set_marker(&mut self, marker: Marker) -> Option<Marker> {
        self.markers.insert(marker.user_id.clone(), marker)
    }

    /// Puts `previous` back unless the marker moved on since `current` was set.
    pub fn restore_marker(&mut self, current: &Marker, previous: Option<Marker>) -> bool {
        if self.markers.get(&current.user_id) != Some(current) {
            return false;
        }
        match previous {
            Some(previous) => {
                self.markers.insert(previous.user_id.clone(), previous);
            }
            None => {
                self.markers.remove(&current.user_id);
            }
        }
        true
    }

    /// Appends a locally created message at the tail.
    ///
    /// The timestamp is clamped so the entry never sorts before the current
    /// tail when the local clock lags the server's.
    pub fn append_local(&mut self, mut message: Message) {
        message.room_id = self.room_id.clone();
        if let Some(latest) = self.latest() {
            message.timestamp = message.timestamp.max(latest.timestamp);
        }
        self.messages.push(message);
    }

    /// Replaces a pending entry with its confirmed counterpart.
    ///
    /// Returns `None` when `client_id` does not name a pending entry.
    pub fn reconcile_pending(
        &mut self,
        client_id: &MessageId,
        confirmed: Message,
    ) -> Option<Reconciled> {
        if !self.get(client_id)?.pending {
            return None;
        }
        self.replace_entry(client_id, confirmed)
    }

    fn replace_entry(&mut self, client_id: &MessageId, mut confirmed: Message) -> Option<Reconciled> {
        let index = self.position(client_id)?;
        confirmed.pending = false;
        confirmed.room_id = self.room_id.clone();

        if &confirmed.id != client_id {
            if let Some(existing) = self.position(&confirmed.id) {
                let id = confirmed.id.clone();
                self.place_existing(existing, confirmed);
                self.retarget_markers(client_id, &id);
                if let Some(stale) = self.position(client_id) {
                    self.messages.remove(stale);
                }
                debug!("Folded pending {} into delivered {}", client_id, id);
                return Some(Reconciled::Folded {
                    previous_id: client_id.clone(),
                    id,
                });
            }
        }

        let id = confirmed.id.clone();
        self.place_existing(index, confirmed);
        self.retarget_markers(client_id, &id);
        Some(Reconciled::Replaced {
            previous_id: client_id.clone(),
            id,
        })
    }

    /// Removes a message. Markers that pointed at it move to its predecessor
    /// when there is one, otherwise they are left dangling.
    pub fn remove_message(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.position(id)?;
        let removed = self.messages.remove(index);
        if let Some(previous) = index.checked_sub(1).map(|i| &self.messages[i]) {
            let (previous_id, previous_ts) = (previous.id.clone(), previous.timestamp);
            for marker in self.markers.values_mut() {
                if &marker.message_id == id {
                    marker.message_id = previous_id.clone();
                    marker.timestamp = previous_ts;
                }
            }
        }
        Some(removed)
    }

    /// Moves the whole timeline, messages and markers included, to a new room id.
    pub fn rekey(&mut self, room_id: RoomId) {
        for message in &mut self.messages {
            message.room_id = room_id.clone();
        }
        for marker in self.markers.values_mut() {
            marker.room_id = room_id.clone();
        }
        self.room_id = room_id;
    }

    /// Absorbs another timeline of the same room (a placeholder's history
    /// landing in a canonical room that already arrived by another path).
    pub fn absorb(&mut self, other: Timeline) {
        let Timeline {
            messages, markers, ..
        } = other;
        for mut message in messages {
            message.room_id = self.room_id.clone();
            if self.position(&message.id).is_some() {
                continue;
            }
            if message.pending {
                self.append_local(message);
            } else {
                self.insert_ordered(message);
            }
        }
        for (user_id, mut marker) in markers {
            marker.room_id = self.room_id.clone();
            self.markers.entry(user_id).or_insert(marker);
        }
    }

    fn insert_ordered(&mut self, message: Message) {
        let tail_ok = self
            .latest()
            .map_or(true, |latest| latest.timestamp <= message.timestamp);
        if tail_ok {
            self.messages.push(message);
        } else {
            let index = self.insertion_point(message.timestamp);
            self.messages.insert(index, message);
        }
    }

    fn insertion_point(&self, timestamp: DateTime<Utc>) -> usize {
        self.messages.partition_point(|m| m.timestamp <= timestamp)
    }

    /// Overwrites the entry at `index`, moving it only if its new timestamp
    /// would break the ordering against its neighbours.
    fn place_existing(&mut self, index: usize, message: Message) {
        let after_previous = index == 0 || self.messages[index - 1].timestamp <= message.timestamp;
        let before_next = index + 1 >= self.messages.len()
            || message.timestamp <= self.messages[index + 1].timestamp;

        if after_previous && before_next {
            self.messages[index] = message;
        } else {
            self.messages.remove(index);
            let target = self.insertion_point(message.timestamp);
            self.messages.insert(target, message);
        }
    }

    fn retarget_markers(&mut self, from: &MessageId, to: &MessageId) {
        if from == to {
            return;
        }
        let Some(timestamp) = self.get(to).map(|m| m.timestamp) else {
            return;
        };
        for marker in self.markers.values_mut() {
            if &marker.message_id == from {
                marker.message_id = to.clone();
                marker.timestamp = timestamp;
            }
        }
    }
}
