//! Unread resolution
//!
//! Determines the last message of a room the signed-in user has not read,
//! from the room's message sequence and the user's own read marker. The
//! result drives unread badges and read-receipt emission.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::store::SyncStore;
use crate::timeline::Timeline;
use crate::types::{Marker, Message, MessageId, RoomId, RoomKind, UserId};

/// Last message of `timeline` that `viewer` has not read.
///
/// Only system notices and text written by someone else can be unread. A
/// marker pointing at a message that is no longer in the sequence fails
/// open: the candidate is reported unread.
pub fn resolve_last_unread(timeline: &Timeline, viewer: &UserId) -> Option<MessageId> {
    let candidate = last_countable(timeline, viewer)?;
    let Some(marked) = marked_message(timeline, viewer) else {
        return Some(candidate.id.clone());
    };
    if marked.id == candidate.id {
        return None;
    }
    // Equal timestamps between two distinct messages stay unread.
    if candidate.timestamp < marked.timestamp {
        None
    } else {
        Some(candidate.id.clone())
    }
}

/// Number of unread messages for badges.
pub fn unread_count(timeline: &Timeline, viewer: &UserId) -> usize {
    if resolve_last_unread(timeline, viewer).is_none() {
        return 0;
    }
    let marked = marked_message(timeline, viewer);
    timeline
        .messages()
        .iter()
        .filter(|m| m.counts_as_unread_for(viewer))
        .filter(|m| match marked {
            Some(marked) => m.id != marked.id && m.timestamp >= marked.timestamp,
            None => true,
        })
        .count()
}

fn last_countable<'a>(timeline: &'a Timeline, viewer: &UserId) -> Option<&'a Message> {
    timeline
        .messages()
        .iter()
        .rev()
        .find(|m| m.counts_as_unread_for(viewer))
}

/// Message the viewer's marker points at, when it is still in the sequence.
fn marked_message<'a>(timeline: &'a Timeline, viewer: &UserId) -> Option<&'a Message> {
    let marker = timeline.marker(viewer)?;
    timeline.get(&marker.message_id)
}

/// Marker change made by viewing a room, to be published by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub room_id: RoomId,
    pub message_id: MessageId,
    /// Marker now in place
    pub marker: Marker,
    /// Marker it superseded, put back if publishing fails
    pub previous: Option<Marker>,
}

/// Per-room unread state for conversation lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub kind: RoomKind,
    pub name: String,
    pub is_placeholder: bool,
    pub member_count: usize,
    pub last_unread: Option<MessageId>,
    pub unread_count: usize,
    pub pending_count: usize,
}

impl SyncStore {
    /// Last unread message of a room for the signed-in user.
    pub fn resolve_last_unread(&self, room_id: &RoomId) -> Option<MessageId> {
        let timeline = self.timelines.get(&self.canonical_room_id(room_id))?;
        resolve_last_unread(timeline, &self.own_user_id)
    }

    pub fn unread_count(&self, room_id: &RoomId) -> usize {
        self.timelines
            .get(&self.canonical_room_id(room_id))
            .map_or(0, |timeline| unread_count(timeline, &self.own_user_id))
    }

    /// Moves the signed-in user's marker onto the last unread message.
    ///
    /// Returns the receipt to publish, or `None` when the room is already
    /// read, is a placeholder, or its last unread message is still pending.
    #[instrument(level = "debug", skip(self))]
    pub fn mark_room_read(&mut self, room_id: &RoomId) -> Option<ReadReceipt> {
        let room_id = self.canonical_room_id(room_id);
        if room_id.is_placeholder() {
            debug!("No read receipt for placeholder room {}", room_id);
            return None;
        }
        let me = self.own_user_id.clone();
        let timeline = self.timelines.get_mut(&room_id)?;
        let message_id = resolve_last_unread(timeline, &me)?;
        let message = timeline.get(&message_id)?;
        if message.pending {
            debug!("Last unread message {} is still pending", message_id);
            return None;
        }

        let marker = Marker::at(message, me);
        let previous = timeline.set_marker(marker.clone());
        debug!("📖 Marked {} read up to {}", room_id, message_id);
        Some(ReadReceipt {
            room_id,
            message_id,
            marker,
            previous,
        })
    }

    /// Undoes a receipt that could not be published, unless the marker has
    /// been replaced since.
    pub fn restore_read_marker(&mut self, receipt: &ReadReceipt) -> bool {
        let room_id = self.canonical_room_id(&receipt.room_id);
        match self.timelines.get_mut(&room_id) {
            Some(timeline) => timeline.restore_marker(&receipt.marker, receipt.previous.clone()),
            None => false,
        }
    }

    /// Unread summaries of every known room, most recently active first.
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<_> = self
            .rooms
            .values()
            .map(|room| {
                let timeline = self.timelines.get(&room.id);
                let latest = timeline.and_then(Timeline::latest).map(|m| m.timestamp);
                let summary = RoomSummary {
                    room_id: room.id.clone(),
                    kind: room.kind,
                    name: room.name.clone(),
                    is_placeholder: room.is_placeholder(),
                    member_count: room.members.len(),
                    last_unread: timeline.and_then(|t| resolve_last_unread(t, &self.own_user_id)),
                    unread_count: timeline.map_or(0, |t| unread_count(t, &self.own_user_id)),
                    pending_count: timeline.map_or(0, |t| t.pending().count()),
                };
                (latest, summary)
            })
            .collect();
        rooms.sort_by(|(a_latest, a), (b_latest, b)| {
            b_latest.cmp(a_latest).then_with(|| a.room_id.cmp(&b.room_id))
        });
        rooms.into_iter().map(|(_, summary)| summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistorySource, MessageKind};
    use chrono::{DateTime, TimeZone, Utc};
    use test_log::test;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn me() -> UserId {
        UserId::from("me")
    }

    fn timeline(messages: Vec<Message>) -> Timeline {
        let mut timeline = Timeline::new(RoomId::from("r1"));
        timeline.merge(messages, HistorySource::InitialInbox);
        timeline
    }

    fn text(id: &str, sender: &str, ms: i64) -> Message {
        Message::text(id, "r1", sender, at(ms), "text")
    }

    fn mark(timeline: &mut Timeline, id: &str, ms: i64) {
        timeline.set_marker(Marker::new("r1", "me", id, at(ms)));
    }

    #[test]
    fn test_empty_room_has_nothing_unread() {
        let timeline = timeline(vec![]);
        assert_eq!(resolve_last_unread(&timeline, &me()), None);
        assert_eq!(unread_count(&timeline, &me()), 0);
    }

    #[test]
    fn test_own_messages_never_count() {
        let timeline = timeline(vec![text("m1", "me", 10), text("m2", "me", 20)]);
        assert_eq!(resolve_last_unread(&timeline, &me()), None);
    }

    #[test]
    fn test_no_marker_reports_last_foreign_message() {
        let timeline = timeline(vec![text("m1", "alice", 10), text("m2", "me", 20)]);
        assert_eq!(resolve_last_unread(&timeline, &me()), Some("m1".into()));
        assert_eq!(unread_count(&timeline, &me()), 1);
    }

    #[test]
    fn test_marker_on_candidate_means_read() {
        let mut timeline = timeline(vec![text("m1", "alice", 10)]);
        mark(&mut timeline, "m1", 10);
        assert_eq!(resolve_last_unread(&timeline, &me()), None);
    }

    #[test]
    fn test_marker_before_candidate_means_unread() {
        let mut timeline = timeline(vec![text("m1", "alice", 10)]);
        mark(&mut timeline, "m1", 10);
        timeline.merge(vec![text("m2", "alice", 20)], HistorySource::Realtime);
        assert_eq!(resolve_last_unread(&timeline, &me()), Some("m2".into()));
        assert_eq!(unread_count(&timeline, &me()), 1);
    }

    #[test]
    fn test_marker_after_candidate_means_read() {
        let mut timeline = timeline(vec![text("m1", "alice", 10), text("m2", "me", 20)]);
        mark(&mut timeline, "m2", 20);
        assert_eq!(resolve_last_unread(&timeline, &me()), None);
        assert_eq!(unread_count(&timeline, &me()), 0);
    }

    #[test]
    fn test_equal_timestamps_stay_unread() {
        let mut timeline = timeline(vec![text("m1", "me", 10), text("m2", "alice", 10)]);
        mark(&mut timeline, "m1", 10);
        assert_eq!(resolve_last_unread(&timeline, &me()), Some("m2".into()));
    }

    #[test]
    fn test_dangling_marker_fails_open() {
        let mut timeline = timeline(vec![text("m1", "alice", 10), text("m2", "alice", 20)]);
        mark(&mut timeline, "purged", 30);
        assert_eq!(resolve_last_unread(&timeline, &me()), Some("m2".into()));
        assert_eq!(unread_count(&timeline, &me()), 2);
    }

    #[test]
    fn test_system_messages_count_regardless_of_author() {
        let mut timeline = timeline(vec![text("m1", "alice", 10)]);
        mark(&mut timeline, "m1", 10);
        timeline.merge(
            vec![Message::system("s1", "r1", "me", at(20), "me renamed the room")],
            HistorySource::Realtime,
        );
        assert_eq!(resolve_last_unread(&timeline, &me()), Some("s1".into()));
    }

    #[test]
    fn test_other_kinds_are_ignored() {
        let mut call = text("c1", "alice", 20);
        call.kind = MessageKind::Other("call".into());
        let timeline = timeline(vec![call]);
        assert_eq!(resolve_last_unread(&timeline, &me()), None);
    }

    #[test]
    fn test_unread_count_skips_messages_before_marker() {
        let mut timeline = timeline(vec![
            text("m1", "alice", 10),
            text("m2", "alice", 20),
            text("m3", "me", 25),
            text("m4", "bob", 30),
            text("m5", "alice", 40),
        ]);
        mark(&mut timeline, "m2", 20);
        assert_eq!(unread_count(&timeline, &me()), 2);
    }

    #[test]
    fn test_mark_room_read_and_restore() {
        let mut store = SyncStore::new("me");
        store.upsert_room(crate::types::Room::new("r1", RoomKind::Group, "Team"));
        store.merge_history(
            &"r1".into(),
            vec![text("m1", "alice", 10), text("m2", "alice", 20)],
            HistorySource::InitialInbox,
        );

        let receipt = store.mark_room_read(&"r1".into()).unwrap();
        assert_eq!(receipt.message_id.as_str(), "m2");
        assert!(receipt.previous.is_none());
        assert_eq!(store.resolve_last_unread(&"r1".into()), None);
        assert!(store.mark_room_read(&"r1".into()).is_none());

        assert!(store.restore_read_marker(&receipt));
        assert_eq!(store.resolve_last_unread(&"r1".into()), Some("m2".into()));
    }

    #[test]
    fn test_summaries_sort_by_activity() {
        let mut store = SyncStore::new("me");
        store.upsert_room(crate::types::Room::new("quiet", RoomKind::Group, "Quiet"));
        store.upsert_room(crate::types::Room::new("busy", RoomKind::Group, "Busy"));
        store.merge_history(
            &"quiet".into(),
            vec![Message::text("q1", "quiet", "alice", at(10), "hi")],
            HistorySource::InitialInbox,
        );
        store.merge_history(
            &"busy".into(),
            vec![Message::text("b1", "busy", "bob", at(50), "hey")],
            HistorySource::InitialInbox,
        );

        let summaries = store.room_summaries();
        let order: Vec<_> = summaries.iter().map(|s| s.room_id.as_str()).collect();
        assert_eq!(order, vec!["busy", "quiet"]);
        assert_eq!(summaries[0].last_unread, Some("b1".into()));
        assert_eq!(summaries[0].unread_count, 1);
    }
}
