//! Integration tests for the Roomsync sync service
//!
//! Collaborators are `mockall` mocks where call expectations matter and
//! hand-written gated fakes where a round trip must stay in flight while
//! another command runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mockall::mock;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use roomsync::SyncService;
use roomsync_common::{Result, SyncError};
use roomsync_core::{
    Attachment, HistorySource, Message, MessageId, MessagingClient, RealtimeEvent, Room, RoomApi,
    RoomId, RoomKind, SentMessage, SyncConfig, UserId,
};

mock! {
    pub Api {}
    #[async_trait]
    impl RoomApi for Api {
        async fn create_room(&self, target: &UserId) -> Result<Room>;
        async fn list_rooms(&self) -> Result<Vec<Room>>;
        async fn send_attachment(
            &self,
            room_id: &RoomId,
            client_id: &MessageId,
            attachment: &Attachment,
        ) -> Result<Message>;
    }
}

mock! {
    pub Messaging {}
    #[async_trait]
    impl MessagingClient for Messaging {
        async fn send_message(
            &self,
            room_id: &RoomId,
            client_id: &MessageId,
            body: &str,
        ) -> Result<SentMessage>;
        async fn send_read_marker(&self, room_id: &RoomId, message_id: &MessageId) -> Result<()>;
        async fn fetch_history(
            &self,
            room_id: &RoomId,
            before: Option<MessageId>,
            limit: usize,
        ) -> Result<Vec<Message>>;
    }
}

/// Room API whose `create_room` and `send_attachment` block until released
#[derive(Default)]
struct GatedApi {
    gate: Notify,
    create_calls: AtomicUsize,
    fail_create: bool,
}

impl GatedApi {
    fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl RoomApi for GatedApi {
    async fn create_room(&self, target: &UserId) -> Result<Room> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        if self.fail_create {
            return Err(SyncError::Network("room creation refused".into()));
        }
        Ok(direct_room("room42", target.as_str()))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        Ok(Vec::new())
    }

    async fn send_attachment(
        &self,
        room_id: &RoomId,
        client_id: &MessageId,
        attachment: &Attachment,
    ) -> Result<Message> {
        self.gate.notified().await;
        Ok(Message::text(format!("srv-{client_id}"), room_id.clone(), "me", Utc::now(), "")
            .with_attachment(attachment.clone()))
    }
}

/// Messaging client that acknowledges every send and records the bodies
#[derive(Default)]
struct RecordingMessaging {
    sent: Mutex<Vec<(RoomId, String)>>,
}

#[async_trait]
impl MessagingClient for RecordingMessaging {
    async fn send_message(
        &self,
        room_id: &RoomId,
        client_id: &MessageId,
        body: &str,
    ) -> Result<SentMessage> {
        self.sent.lock().unwrap().push((room_id.clone(), body.to_owned()));
        Ok(SentMessage {
            server_id: Some(format!("stanza-{client_id}").into()),
            timestamp: None,
        })
    }

    async fn send_read_marker(&self, _room_id: &RoomId, _message_id: &MessageId) -> Result<()> {
        Ok(())
    }

    async fn fetch_history(
        &self,
        _room_id: &RoomId,
        _before: Option<MessageId>,
        _limit: usize,
    ) -> Result<Vec<Message>> {
        Ok(Vec::new())
    }
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn direct_room(id: &str, target: &str) -> Room {
    Room::new(id, RoomKind::OneToOne, target)
        .with_member("me", true)
        .with_member(target, false)
}

fn config() -> SyncConfig {
    let mut config = SyncConfig::new("me");
    config.history_page_size = 2;
    config
}

async fn seed_group(service: &SyncService<impl RoomApi, impl MessagingClient>) {
    let room = Room::new("r1", RoomKind::Group, "Team")
        .with_member("me", true)
        .with_member("alice", false);
    service.handle_event(RealtimeEvent::RoomUpdated { room }).await.unwrap();
    service
        .handle_event(RealtimeEvent::HistoryBatch {
            room_id: "r1".into(),
            source: HistorySource::InitialInbox,
            messages: vec![
                Message::text("m1", "r1", "alice", at(10), "hello"),
                Message::text("m2", "r1", "alice", at(20), "anyone?"),
            ],
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_direct_chat_confirms_placeholder_and_sends() {
    let mut api = MockApi::new();
    api.expect_create_room()
        .times(1)
        .returning(|target| Ok(direct_room("room42", target.as_str())));
    let mut messaging = MockMessaging::new();
    messaging
        .expect_send_message()
        .withf(|room, _, body| room.as_str() == "room42" && body == "hi")
        .times(1)
        .returning(|_, _, _| {
            Ok(SentMessage {
                server_id: Some("stanza-1".into()),
                timestamp: None,
            })
        });

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    let room_id = service
        .start_direct_chat(&"u1".into(), Some("hi".into()), None)
        .await
        .unwrap();

    assert_eq!(room_id.as_str(), "room42");
    let messages = service.messages(&"room42".into()).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.as_str(), "stanza-1");
    assert!(!messages[0].pending);

    let store = service.store();
    let store = store.read().await;
    assert!(store.rooms().all(|room| !room.is_placeholder()));
    assert!(store.placeholder_room(&"u1".into()).is_none());
}

#[tokio::test]
async fn test_failed_room_creation_rolls_back() {
    let mut api = MockApi::new();
    api.expect_create_room()
        .times(1)
        .returning(|_| Err(SyncError::Network("connection reset".into())));
    let messaging = MockMessaging::new();

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    let err = service
        .start_direct_chat(&"u1".into(), Some("hi".into()), None)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(service.room_summaries().await.is_empty());
    assert!(service.messages(&"placeholder-u1".into()).await.is_empty());
}

#[tokio::test]
async fn test_second_chat_request_reuses_in_flight_placeholder() {
    let api = Arc::new(GatedApi::default());
    let messaging = Arc::new(RecordingMessaging::default());
    let service = SyncService::new(config(), Arc::clone(&api), Arc::clone(&messaging));
    let target = UserId::from("u1");

    let first = service.start_direct_chat(&target, Some("one".into()), None);
    let second = async {
        loop {
            if service.store().read().await.placeholder_room(&target).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let result = service.start_direct_chat(&target, Some("two".into()), None).await;
        api.gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().as_str(), "room42");
    assert_eq!(second.unwrap().as_str(), "placeholder-u1");
    assert_eq!(api.create_calls.load(Ordering::SeqCst), 1);

    let sent = messaging.sent.lock().unwrap().clone();
    assert_eq!(
        sent,
        vec![
            (RoomId::from("room42"), "one".to_owned()),
            (RoomId::from("room42"), "two".to_owned()),
        ]
    );
    let messages = service.messages(&"placeholder-u1".into()).await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.pending && m.room_id.as_str() == "room42"));
}

#[tokio::test]
async fn test_failed_creation_discards_input_of_reusing_caller() {
    let api = Arc::new(GatedApi::failing());
    let messaging = Arc::new(RecordingMessaging::default());
    let service = SyncService::new(config(), Arc::clone(&api), Arc::clone(&messaging));
    let target = UserId::from("u1");

    let first = service.start_direct_chat(&target, Some("one".into()), None);
    let second = async {
        loop {
            if service.store().read().await.placeholder_room(&target).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let result = service.start_direct_chat(&target, Some("two".into()), None).await;
        api.gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(matches!(first, Err(SyncError::Network(_))));
    let placeholder = assert_ok!(second);
    assert_eq!(placeholder.as_str(), "placeholder-u1");
    assert_eq!(api.create_calls.load(Ordering::SeqCst), 1);

    let store = service.store();
    let store = store.read().await;
    assert!(store.room(&placeholder).is_none());
    assert!(store.messages(&placeholder).is_empty());
    assert!(store.placeholder_room(&target).is_none());
    assert!(messaging.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_chat_with_file_uploads_into_real_room() {
    let mut api = MockApi::new();
    api.expect_create_room()
        .times(1)
        .returning(|target| Ok(direct_room("room42", target.as_str())));
    api.expect_send_attachment()
        .withf(|room, _, attachment| room.as_str() == "room42" && attachment.name == "cat.png")
        .times(1)
        .returning(|room, client_id, attachment| {
            Ok(Message::text(format!("srv-{client_id}"), room.clone(), "me", at(30), "")
                .with_attachment(attachment.clone()))
        });
    let messaging = MockMessaging::new();

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    let file = Attachment::new("cat.png", "image/png", 2048);
    let room_id = assert_ok!(service.start_direct_chat(&"u1".into(), None, Some(file)).await);

    assert_eq!(room_id.as_str(), "room42");
    let messages = service.messages(&room_id).await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].id.as_str().starts_with("srv-"));
    assert!(!messages[0].pending);
    assert_eq!(messages[0].room_id.as_str(), "room42");

    let store = service.store();
    let store = store.read().await;
    assert!(!store.is_upload_active(&messages[0].id));
    assert!(store.rooms().all(|room| !room.is_placeholder()));
}

#[tokio::test]
async fn test_cancelled_upload_leaves_no_trace() {
    let api = Arc::new(GatedApi::default());
    let messaging = Arc::new(RecordingMessaging::default());
    let service = SyncService::new(config(), Arc::clone(&api), messaging);
    seed_group(&service).await;

    let attachment = Attachment::new("big.mov", "video/quicktime", 1 << 30);
    let room_id: RoomId = "r1".into();
    let upload = service.send_attachment(&room_id, attachment);
    let cancel = async {
        let client_id = loop {
            let pending = service
                .messages(&"r1".into())
                .await
                .into_iter()
                .find(|m| m.pending)
                .map(|m| m.id);
            if let Some(id) = pending {
                break id;
            }
            tokio::task::yield_now().await;
        };
        tokio::task::yield_now().await;
        service.cancel_upload(&client_id).await
    };
    let (upload, cancelled) = tokio::join!(upload, cancel);

    assert!(cancelled);
    assert!(matches!(upload, Err(SyncError::Cancelled(_))));
    let messages = service.messages(&"r1".into()).await;
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.pending));
}

#[tokio::test]
async fn test_failed_send_removes_pending_message() {
    let api = MockApi::new();
    let mut messaging = MockMessaging::new();
    messaging
        .expect_send_message()
        .times(1)
        .returning(|_, _, _| Err(SyncError::Network("timeout".into())));

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    seed_group(&service).await;

    let err = service.send_text(&"r1".into(), "hello?".into()).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(service.messages(&"r1".into()).await.len(), 2);
}

#[tokio::test]
async fn test_view_room_publishes_read_marker() {
    let api = MockApi::new();
    let mut messaging = MockMessaging::new();
    messaging
        .expect_send_read_marker()
        .withf(|room, message| room.as_str() == "r1" && message.as_str() == "m2")
        .times(1)
        .returning(|_, _| Ok(()));

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    seed_group(&service).await;

    assert_eq!(service.view_room(&"r1".into()).await.unwrap(), Some("m2".into()));
    assert_eq!(service.resolve_last_unread(&"r1".into()).await, None);
    // Already read: nothing else is published.
    assert_eq!(service.view_room(&"r1".into()).await.unwrap(), None);
}

#[tokio::test]
async fn test_view_room_restores_marker_when_publishing_fails() {
    let api = MockApi::new();
    let mut messaging = MockMessaging::new();
    messaging
        .expect_send_read_marker()
        .times(1)
        .returning(|_, _| Err(SyncError::Network("offline".into())));

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    seed_group(&service).await;

    assert_err!(service.view_room(&"r1".into()).await);
    assert_eq!(service.resolve_last_unread(&"r1".into()).await, Some("m2".into()));
}

#[tokio::test]
async fn test_read_receipts_can_be_disabled() {
    let api = MockApi::new();
    let messaging = MockMessaging::new();
    let mut config = config();
    config.send_read_receipts = false;

    let service = SyncService::new(config, Arc::new(api), Arc::new(messaging));
    seed_group(&service).await;

    assert_eq!(service.view_room(&"r1".into()).await.unwrap(), Some("m2".into()));
    assert_eq!(service.resolve_last_unread(&"r1".into()).await, None);
}

#[tokio::test]
async fn test_sync_rooms_confirms_outstanding_placeholder() {
    let mut api = MockApi::new();
    api.expect_list_rooms()
        .times(1)
        .returning(|| Ok(vec![direct_room("room42", "u1")]));
    let mut messaging = MockMessaging::new();
    messaging
        .expect_send_message()
        .withf(|room, _, body| room.as_str() == "room42" && body == "queued")
        .times(1)
        .returning(|_, _, _| {
            Ok(SentMessage {
                server_id: None,
                timestamp: None,
            })
        });

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    service
        .store()
        .write()
        .await
        .create_placeholder_room(&"u1".into(), Some("queued".into()), None)
        .unwrap();

    assert_eq!(assert_ok!(service.sync_rooms().await), 1);
    let messages = service.messages(&"room42".into()).await;
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].pending);
}

#[tokio::test]
async fn test_older_history_is_requested_before_earliest_message() {
    let api = MockApi::new();
    let mut messaging = MockMessaging::new();
    messaging
        .expect_fetch_history()
        .withf(|room, before, limit| {
            room.as_str() == "r1" && before.as_ref().map(MessageId::as_str) == Some("m1") && *limit == 2
        })
        .times(1)
        .returning(|_, _, _| {
            Ok(vec![
                Message::text("m-1", "r1", "alice", at(1), "older"),
                Message::text("m0", "r1", "alice", at(5), "old"),
            ])
        });

    let service = SyncService::new(config(), Arc::new(api), Arc::new(messaging));
    seed_group(&service).await;

    let outcome = service.load_older_history(&"r1".into()).await.unwrap();
    assert_eq!(outcome.inserted, 2);
    let ids: Vec<_> = service
        .messages(&"r1".into())
        .await
        .into_iter()
        .map(|m| m.id.as_str().to_owned())
        .collect();
    assert_eq!(ids, vec!["m-1", "m0", "m1", "m2"]);
}

#[tokio::test]
async fn test_malformed_raw_event_is_rejected() {
    let service = SyncService::new(config(), Arc::new(MockApi::new()), Arc::new(MockMessaging::new()));
    let err = service.handle_raw_event(r#"{"type":"nope"}"#).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidEvent(_)));
    assert!(service.room_summaries().await.is_empty());
}
