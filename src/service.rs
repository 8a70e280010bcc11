//! Async synchronization service
//!
//! [`SyncService`] drives a [`SyncStore`] against the REST and messaging
//! collaborators. The store sits behind a `tokio` read-write lock that is
//! never held across an `.await`: every network round trip runs unlocked and
//! its completion re-enters the store as one write-locked transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::{AbortHandle, Abortable, Aborted};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use roomsync_common::{Result, SyncError};
use roomsync_core::{
    Attachment, Confirmation, DeferredAction, EventEffect, HistorySource, MergeOutcome, Message,
    MessageDraft, MessageId, MessagingClient, RealtimeEvent, RoomApi, RoomId, RoomSummary,
    SyncConfig, SyncStore, UserId,
};

/// Drives the synchronization core against its collaborators
pub struct SyncService<A, M> {
    store: Arc<RwLock<SyncStore>>,
    api: Arc<A>,
    messaging: Arc<M>,
    config: SyncConfig,
    /// Abort handles of uploads currently running
    uploads: Mutex<HashMap<MessageId, AbortHandle>>,
}

impl<A, M> SyncService<A, M>
where
    A: RoomApi,
    M: MessagingClient,
{
    pub fn new(config: SyncConfig, api: Arc<A>, messaging: Arc<M>) -> Self {
        info!("🔧 Starting sync service for {}", config.own_user_id);
        Self {
            store: Arc::new(RwLock::new(SyncStore::from_config(&config))),
            api,
            messaging,
            config,
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared handle on the store, for snapshot reads
    pub fn store(&self) -> Arc<RwLock<SyncStore>> {
        Arc::clone(&self.store)
    }

    pub async fn room_summaries(&self) -> Vec<RoomSummary> {
        self.store.read().await.room_summaries()
    }

    pub async fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        let store = self.store.read().await;
        store.messages(&store.canonical_room_id(room_id)).to_vec()
    }

    pub async fn resolve_last_unread(&self, room_id: &RoomId) -> Option<MessageId> {
        self.store.read().await.resolve_last_unread(room_id)
    }

    /// Lists rooms from the server, confirming any placeholder the listing
    /// answers, and runs the sends released by those confirmations.
    #[instrument(level = "debug", skip(self))]
    pub async fn sync_rooms(&self) -> Result<usize> {
        let start = Instant::now();
        let rooms = self.api.list_rooms().await.inspect_err(|e| e.log())?;
        let count = rooms.len();
        let released = self.store.write().await.apply_room_list(rooms)?;
        self.run_deferred(released).await;
        info!("✅ Synced {} rooms in {:?}", count, start.elapsed());
        Ok(count)
    }

    /// Opens (or reuses) a one-to-one room with `target` and sends the input.
    ///
    /// Without an existing room a placeholder is returned at once while the
    /// creation request runs. A call that finds a placeholder already
    /// outstanding queues its input there and returns the placeholder id.
    ///
    /// Input queued by such a call shares the fate of the pending creation:
    /// when that creation fails the placeholder is rolled back and every
    /// queued message is discarded, including those of callers that already
    /// got `Ok`. Those callers observe the rollback as the placeholder id
    /// resolving to no room.
    #[instrument(level = "debug", skip(self, text, file))]
    pub async fn start_direct_chat(
        &self,
        target: &UserId,
        text: Option<String>,
        file: Option<Attachment>,
    ) -> Result<RoomId> {
        let existing = self
            .store
            .read()
            .await
            .direct_room_with(target)
            .map(|room| room.id.clone());
        if let Some(room_id) = existing {
            debug!("Direct room {} with {} already exists", room_id, target);
            if let Some(body) = text.filter(|body| !body.trim().is_empty()) {
                self.send_text(&room_id, body).await?;
            }
            if let Some(file) = file {
                self.send_attachment(&room_id, file).await?;
            }
            return Ok(room_id);
        }

        let placeholder = self
            .store
            .write()
            .await
            .create_placeholder_room(target, text, file)?;
        if placeholder.reused {
            debug!("Creation for {} already in flight", target);
            return Ok(placeholder.room_id);
        }

        match self.api.create_room(target).await {
            Ok(room) => {
                let room_id = room.id.clone();
                let actions = self
                    .store
                    .write()
                    .await
                    .confirm_placeholder_room(target, room)?;
                self.run_deferred(actions).await;
                Ok(room_id)
            }
            Err(e) => {
                error!("❌ Creating a room with {} failed: {}", target, e);
                if let Some(rolled_back) = self.store.write().await.fail_placeholder_room(target) {
                    warn!(
                        "⚠️ Discarded {} queued messages of {}",
                        rolled_back.discarded.len(),
                        rolled_back.room.id
                    );
                }
                Err(e)
            }
        }
    }

    /// Sends text into a room, showing it as pending until acknowledged.
    ///
    /// Against a placeholder room the send is deferred until the room exists.
    #[instrument(level = "debug", skip(self, body))]
    pub async fn send_text(&self, room_id: &RoomId, body: String) -> Result<MessageId> {
        let (room_id, client_id) = {
            let mut store = self.store.write().await;
            let room_id = store.canonical_room_id(room_id);
            let client_id = store.set_placeholder_message(&room_id, MessageDraft::text(body.clone()))?;
            (room_id, client_id)
        };
        if room_id.is_placeholder() {
            return Ok(client_id);
        }
        self.dispatch_text(&room_id, &client_id, &body).await?;
        Ok(client_id)
    }

    /// Uploads an attachment into a room as a cancellable pending message.
    #[instrument(level = "debug", skip(self, attachment), fields(name = %attachment.name))]
    pub async fn send_attachment(&self, room_id: &RoomId, attachment: Attachment) -> Result<MessageId> {
        let (room_id, client_id) = {
            let mut store = self.store.write().await;
            let room_id = store.canonical_room_id(room_id);
            let client_id = store.begin_upload(&room_id, attachment.clone())?;
            (room_id, client_id)
        };
        if room_id.is_placeholder() {
            return Ok(client_id);
        }
        self.dispatch_upload(&room_id, &client_id, &attachment).await?;
        Ok(client_id)
    }

    /// Cancels an upload, running or queued. Returns whether one was active.
    pub async fn cancel_upload(&self, client_id: &MessageId) -> bool {
        if let Some(handle) = self.upload_handles().remove(client_id) {
            handle.abort();
        }
        self.store.write().await.cancel_upload(client_id).is_some()
    }

    /// Marks a room read and publishes the receipt.
    ///
    /// The local marker is put back when publishing fails, unless a newer
    /// marker arrived meanwhile. Returns the message now marked read.
    #[instrument(level = "debug", skip(self))]
    pub async fn view_room(&self, room_id: &RoomId) -> Result<Option<MessageId>> {
        let Some(receipt) = self.store.write().await.mark_room_read(room_id) else {
            return Ok(None);
        };
        if !self.config.send_read_receipts {
            return Ok(Some(receipt.message_id));
        }
        match self
            .messaging
            .send_read_marker(&receipt.room_id, &receipt.message_id)
            .await
        {
            Ok(()) => Ok(Some(receipt.message_id)),
            Err(e) => {
                e.log();
                let restored = self.store.write().await.restore_read_marker(&receipt);
                warn!(
                    "⚠️ Read marker for {} not published, restored: {}",
                    receipt.room_id, restored
                );
                Err(e)
            }
        }
    }

    /// Applies a real-time event and runs any sends it released.
    pub async fn handle_event(&self, event: RealtimeEvent) -> Result<EventEffect> {
        let effect = self.store.write().await.apply_event(event)?;
        if let EventEffect::RoomUpserted { released, .. } = &effect {
            self.run_deferred(released.clone()).await;
        }
        Ok(effect)
    }

    pub async fn handle_raw_event(&self, raw: &str) -> Result<EventEffect> {
        let event = RealtimeEvent::from_json(raw).inspect_err(|e| e.log())?;
        self.handle_event(event).await
    }

    /// Fetches the newest page of a room's history.
    #[instrument(level = "debug", skip(self))]
    pub async fn load_initial_history(&self, room_id: &RoomId) -> Result<MergeOutcome> {
        let room_id = self.store.read().await.canonical_room_id(room_id);
        if room_id.is_placeholder() {
            return Ok(MergeOutcome::default());
        }
        let messages = self
            .messaging
            .fetch_history(&room_id, None, self.config.history_page_size)
            .await?;
        Ok(self
            .store
            .write()
            .await
            .merge_history(&room_id, messages, HistorySource::InitialInbox))
    }

    /// Fetches the page of history preceding the earliest known message.
    #[instrument(level = "debug", skip(self))]
    pub async fn load_older_history(&self, room_id: &RoomId) -> Result<MergeOutcome> {
        let (room_id, before) = {
            let store = self.store.read().await;
            let room_id = store.canonical_room_id(room_id);
            let before = store
                .messages(&room_id)
                .iter()
                .find(|m| !m.pending)
                .map(|m| m.id.clone());
            (room_id, before)
        };
        if room_id.is_placeholder() {
            return Ok(MergeOutcome::default());
        }
        let messages = self
            .messaging
            .fetch_history(&room_id, before, self.config.history_page_size)
            .await?;
        Ok(self
            .store
            .write()
            .await
            .merge_history(&room_id, messages, HistorySource::PaginatedHistory))
    }

    /// Runs sends queued against a placeholder room, in commit order.
    ///
    /// Failures are logged and leave the message removed; they do not stop
    /// the remaining actions. Returns how many failed.
    async fn run_deferred(&self, actions: Vec<DeferredAction>) -> usize {
        let mut failed = 0;
        for action in actions {
            let result = match &action {
                DeferredAction::SendText {
                    room_id,
                    client_id,
                    body,
                } => self.dispatch_text(room_id, client_id, body).await,
                DeferredAction::UploadAttachment {
                    room_id,
                    client_id,
                    attachment,
                } => {
                    if !self.store.read().await.is_upload_active(client_id) {
                        debug!("Queued upload {} was cancelled", client_id);
                        continue;
                    }
                    self.dispatch_upload(room_id, client_id, attachment).await
                }
            };
            if result.is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("⚠️ {} deferred sends failed", failed);
        }
        failed
    }

    async fn dispatch_text(&self, room_id: &RoomId, client_id: &MessageId, body: &str) -> Result<()> {
        match self.messaging.send_message(room_id, client_id, body).await {
            Ok(sent) => {
                self.store
                    .write()
                    .await
                    .confirm_message(room_id, client_id, Confirmation::Ack(sent))?;
                Ok(())
            }
            Err(e) => {
                e.log();
                self.store.write().await.fail_message(room_id, client_id);
                Err(e)
            }
        }
    }

    async fn dispatch_upload(
        &self,
        room_id: &RoomId,
        client_id: &MessageId,
        attachment: &Attachment,
    ) -> Result<()> {
        let (handle, registration) = AbortHandle::new_pair();
        self.upload_handles().insert(client_id.clone(), handle);

        let upload = Abortable::new(
            self.api.send_attachment(room_id, client_id, attachment),
            registration,
        );
        let result = upload.await;
        self.upload_handles().remove(client_id);

        match result {
            Ok(Ok(message)) => {
                self.store
                    .write()
                    .await
                    .confirm_message(room_id, client_id, Confirmation::Delivered(message))?;
                Ok(())
            }
            Ok(Err(e)) => {
                e.log();
                self.store.write().await.fail_message(room_id, client_id);
                Err(e)
            }
            Err(Aborted) => {
                debug!("Upload {} aborted", client_id);
                Err(SyncError::Cancelled(format!("upload {client_id} cancelled")))
            }
        }
    }

    fn upload_handles(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, AbortHandle>> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
