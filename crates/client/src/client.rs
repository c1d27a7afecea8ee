//! High-level chat client.
//!
//! Owns the state, both sockets, the event bus and the REST client, and
//! wires the listener sets together. Two listener scopes exist: global
//! listeners attached once for the session lifetime (unread/badge traffic,
//! rate limiting), and chat listeners attached per open thread and detached
//! when the thread closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use intrachat_shared::{
    AddMembersRequest, ApiError, ChangeRoleRequest, ChatClientCommand, ChatUser,
    CreateThreadRequest, EditMessageRequest, Message, ReactionRequest, RemoveMemberRequest,
    SendMessageRequest, Thread, ThreadFilters, UpdateGroupSettingsRequest, UploadProgress,
    UploadStatus, TEMP_ID_PREFIX,
};

use crate::api::ChatApi;
use crate::config::ChatConfig;
use crate::events::{Event, EventBus, ListenerId};
use crate::notify::{truncate_body, ChatNotification, Notifier};
use crate::state::{ArrivalEffect, ChatState};
use crate::token::TokenProvider;
use crate::transport::SocketManager;
use crate::typing::TypingTracker;
use crate::unread::UnreadReconciler;

const NOTIFICATION_BODY_MAX_CHARS: usize = 100;
const RATE_LIMIT_CODE: &str = "RATE_LIMIT_EXCEEDED";

struct Inner {
    config: ChatConfig,
    current_user_id: i64,
    state: Mutex<ChatState>,
    unread: Mutex<UnreadReconciler>,
    typing: TypingTracker,
    sockets: SocketManager,
    bus: EventBus,
    api: ChatApi,
    notifier: Arc<dyn Notifier>,
    global_attached: AtomicBool,
    chat_listeners: Mutex<Vec<(&'static str, ListenerId)>>,
    last_notification_count: Mutex<Option<u64>>,
    refresh_debounce: Mutex<Option<JoinHandle<()>>>,
    rate_limit_task: Mutex<Option<JoinHandle<()>>>,
}

/// Entry point for embedding applications. Cheap to clone.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    pub fn new(
        config: ChatConfig,
        tokens: Arc<dyn TokenProvider>,
        notifier: Arc<dyn Notifier>,
        current_user_id: i64,
    ) -> Self {
        let bus = EventBus::new();
        let sockets = SocketManager::new(config.clone(), tokens.clone(), bus.clone());
        let api = ChatApi::new(config.api_base.clone(), tokens);
        let unread = UnreadReconciler::new(config.unread_priority_window);
        let typing = TypingTracker::new(config.typing_ttl);

        Self {
            inner: Arc::new(Inner {
                config,
                current_user_id,
                state: Mutex::new(ChatState::new()),
                unread: Mutex::new(unread),
                typing,
                sockets,
                bus,
                api,
                notifier,
                global_attached: AtomicBool::new(false),
                chat_listeners: Mutex::new(Vec::new()),
                last_notification_count: Mutex::new(None),
                refresh_debounce: Mutex::new(None),
                rate_limit_task: Mutex::new(None),
            }),
        }
    }

    /// Attach session-lifetime listeners and open the notification socket.
    pub fn start(&self) {
        self.inner.attach_global_listeners();
        self.inner.sockets.connect_notifications();
    }

    /// Tear down both sockets and all per-thread listeners. Global
    /// listeners stay registered but go quiet without a socket.
    pub fn shutdown(&self) {
        self.inner.detach_chat_listeners();
        self.inner.sockets.disconnect_chat();
        self.inner.sockets.disconnect_notifications();
        self.inner.typing.clear();
        info!("chat client shut down");
    }

    /// Subscription surface for the embedding application.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Read access to the synchronized state.
    pub fn with_state<R>(&self, f: impl FnOnce(&ChatState) -> R) -> R {
        f(&self.inner.state.lock().expect("state lock poisoned"))
    }

    /// Total unread across all known threads, push-buffered ones included.
    pub fn total_unread(&self) -> u64 {
        // The state and unread locks are never held together.
        let threads = {
            let state = self.inner.state.lock().expect("state lock poisoned");
            state.threads.clone()
        };
        self.inner
            .unread
            .lock()
            .expect("unread lock poisoned")
            .total(&threads)
    }

    // --- Thread operations ---

    pub async fn fetch_threads(&self, filters: &ThreadFilters) -> Result<(), ApiError> {
        let mut response = self.inner.api.list_threads(filters).await?;
        {
            let mut unread = self.inner.unread.lock().expect("unread lock poisoned");
            unread.apply_rest_snapshot(&mut response.results);
        }
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.set_threads(response.results);
        Ok(())
    }

    /// Create a thread and open it. A duplicate-direct conflict resolves
    /// to the already-existing thread instead of an error.
    pub async fn create_thread(&self, req: &CreateThreadRequest) -> Result<Thread, ApiError> {
        let thread = match self.inner.api.create_thread(req).await {
            Ok(thread) => thread,
            Err(err) => match err.existing_thread_id() {
                Some(existing_id) => {
                    debug!(existing_id, "direct thread already exists, reusing");
                    self.inner.api.get_thread(&existing_id).await?
                }
                None => return Err(err),
            },
        };
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(thread.clone());
        self.select_thread(&thread.id).await?;
        Ok(thread)
    }

    /// Open a thread: switch state, re-scope the chat listeners, connect
    /// the chat socket, load the newest page and clear the unread count.
    pub async fn select_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if !state.select_thread(thread_id) {
                debug!(thread_id, "thread already selected");
                return Ok(());
            }
        }
        self.inner.typing.clear();
        self.inner.detach_chat_listeners();
        self.inner.attach_chat_listeners();
        self.inner.sockets.connect_chat(thread_id);

        let detail = self.inner.api.get_thread(thread_id).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(detail);

        let page = self.inner.api.list_messages(thread_id, None).await?;
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if state.selected_thread_id.as_deref() != Some(thread_id) {
                // The user moved on while the fetch was in flight.
                return Ok(());
            }
            state.set_messages_from_page(page.results, page.next);
        }
        self.mark_thread_read(thread_id).await;
        Ok(())
    }

    /// Close the open thread and drop its socket and listeners.
    pub fn close_thread(&self) {
        self.inner.detach_chat_listeners();
        self.inner.sockets.disconnect_chat();
        self.inner.typing.clear();
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.selected_thread_id = None;
        state.messages.clear();
        state.older_cursor = None;
    }

    pub async fn load_more_messages(&self) -> Result<(), ApiError> {
        let (thread_id, cursor) = {
            let state = self.inner.state.lock().expect("state lock poisoned");
            match (&state.selected_thread_id, &state.older_cursor) {
                (Some(thread_id), Some(cursor)) => (thread_id.clone(), cursor.clone()),
                _ => return Ok(()),
            }
        };
        let page = self.inner.api.list_messages(&thread_id, Some(&cursor)).await?;
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        if state.selected_thread_id.as_deref() == Some(thread_id.as_str()) {
            state.prepend_older_page(page.results, page.next);
        }
        Ok(())
    }

    pub async fn leave_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        self.inner.api.leave_thread(thread_id).await?;
        if self
            .inner
            .state
            .lock()
            .expect("state lock poisoned")
            .selected_thread_id
            .as_deref()
            == Some(thread_id)
        {
            self.close_thread();
        }
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .remove_thread(thread_id);
        Ok(())
    }

    pub async fn add_members(
        &self,
        thread_id: &str,
        req: &AddMembersRequest,
    ) -> Result<(), ApiError> {
        let thread = self.inner.api.add_members(thread_id, req).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(thread);
        Ok(())
    }

    pub async fn remove_member(
        &self,
        thread_id: &str,
        req: &RemoveMemberRequest,
    ) -> Result<(), ApiError> {
        let thread = self.inner.api.remove_member(thread_id, req).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(thread);
        Ok(())
    }

    pub async fn change_role(
        &self,
        thread_id: &str,
        req: &ChangeRoleRequest,
    ) -> Result<(), ApiError> {
        let thread = self.inner.api.change_role(thread_id, req).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(thread);
        Ok(())
    }

    pub async fn update_group_settings(
        &self,
        thread_id: &str,
        req: &UpdateGroupSettingsRequest,
    ) -> Result<(), ApiError> {
        let thread = self.inner.api.update_group_settings(thread_id, req).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .upsert_thread(thread);
        Ok(())
    }

    // --- Message operations ---

    /// Send a message: an optimistic entry appears immediately and the
    /// REST response confirms it in place (the socket echo, arriving with
    /// the same id, deduplicates). Completed uploads are attached and
    /// consumed. No automatic retry on failure.
    ///
    /// Returns `Ok(false)` without sending when no thread is selected or a
    /// rate-limit cooldown is active, `Ok(true)` once the message is
    /// accepted.
    pub async fn send_message(
        &self,
        content: &str,
        reply_to: Option<String>,
    ) -> Result<bool, ApiError> {
        let (thread_id, temp_id, attachment_ids) = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            let Some(thread_id) = state.selected_thread_id.clone() else {
                return Ok(false);
            };
            if state.rate_limit_seconds_left > 0 {
                warn!("message send blocked by rate-limit cooldown");
                return Ok(false);
            }
            let attachment_ids = state.completed_attachment_ids();
            let temp_id = format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4());
            state.insert_optimistic(Message {
                id: temp_id.clone(),
                thread_id: thread_id.clone(),
                sender: self.inner.self_user(),
                content: content.to_string(),
                reply_to: None,
                attachments: Vec::new(),
                has_attachments: !attachment_ids.is_empty(),
                reactions: Vec::new(),
                created_at: chrono::Utc::now(),
                edited_at: None,
                deleted_at: None,
                is_deleted: false,
            });
            state.clear_completed_uploads();
            (thread_id, temp_id, attachment_ids)
        };

        let req = SendMessageRequest {
            content: content.to_string(),
            reply_to,
            attachment_ids: (!attachment_ids.is_empty()).then_some(attachment_ids),
        };
        match self.inner.api.send_message(&thread_id, &req).await {
            Ok(confirmed) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .confirm_optimistic(&temp_id, confirmed);
                Ok(true)
            }
            Err(err) => {
                let mut state = self.inner.state.lock().expect("state lock poisoned");
                state.remove_optimistic(&temp_id);
                state.last_error = Some(err.detail());
                Err(err)
            }
        }
    }

    pub async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), ApiError> {
        let req = EditMessageRequest {
            content: content.to_string(),
        };
        let updated = self.inner.api.edit_message(message_id, &req).await?;
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .apply_message_update(&updated);
        Ok(())
    }

    /// Delete with an optimistic tombstone; the pre-delete snapshot is
    /// restored locally if the request fails (no extra network round-trip,
    /// which would likely fail for the same reason).
    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        let snapshot = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            let snapshot = state
                .messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned();
            state.apply_message_delete(message_id);
            snapshot
        };

        if let Err(err) = self.inner.api.delete_message(message_id).await {
            if let Some(original) = snapshot {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .replace_message(original);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Optimistic reaction: applied locally, sent over the socket when
    /// open, otherwise through REST with the refreshed message replacing
    /// the local copy. Rolled back on failure.
    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<(), ApiError> {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if !state.apply_reaction_add(message_id, emoji, self.inner.self_user()) {
                return Ok(());
            }
        }

        if self.inner.sockets.is_chat_open() {
            self.inner.sockets.send_chat(&ChatClientCommand::ReactionAdd {
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
            });
            return Ok(());
        }

        let req = ReactionRequest {
            emoji: emoji.to_string(),
        };
        match self.inner.api.add_reaction(message_id, &req).await {
            Ok(message) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .replace_message(message);
                Ok(())
            }
            Err(err) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_reaction_remove(message_id, emoji, self.inner.current_user_id);
                Err(err)
            }
        }
    }

    pub async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<(), ApiError> {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            if !state.apply_reaction_remove(message_id, emoji, self.inner.current_user_id) {
                return Ok(());
            }
        }

        if self.inner.sockets.is_chat_open() {
            self.inner
                .sockets
                .send_chat(&ChatClientCommand::ReactionRemove {
                    message_id: message_id.to_string(),
                    emoji: emoji.to_string(),
                });
            return Ok(());
        }

        let req = ReactionRequest {
            emoji: emoji.to_string(),
        };
        match self.inner.api.remove_reaction(message_id, &req).await {
            Ok(message) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .replace_message(message);
                Ok(())
            }
            Err(err) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_reaction_add(message_id, emoji, self.inner.self_user());
                Err(err)
            }
        }
    }

    /// Best-effort read marker: local state and the reconciler update
    /// immediately, the backend call failing is only logged.
    pub async fn mark_thread_read(&self, thread_id: &str) {
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.mark_thread_read_local(thread_id);
        }
        self.inner
            .unread
            .lock()
            .expect("unread lock poisoned")
            .record_push(thread_id, 0);

        if let Err(err) = self.inner.api.mark_thread_read(thread_id).await {
            warn!(thread_id, "failed to mark thread read: {}", err.detail());
        }
    }

    // --- Typing ---

    pub fn send_typing_start(&self) {
        self.inner.sockets.send_chat(&ChatClientCommand::TypingStart);
    }

    pub fn send_typing_stop(&self) {
        self.inner.sockets.send_chat(&ChatClientCommand::TypingStop);
    }

    /// (user id, display name) pairs currently typing in the open thread.
    pub fn typing_users(&self) -> Vec<(i64, String)> {
        self.inner.typing.snapshot()
    }

    // --- Uploads ---

    /// Upload a file for attachment to the next send. Returns the upload
    /// entry id used for progress and caption edits.
    pub async fn upload_attachment(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String, ApiError> {
        let upload_id = Uuid::new_v4().to_string();
        {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.upload_started(UploadProgress {
                id: upload_id.clone(),
                file_name: file_name.to_string(),
                progress: 0,
                status: UploadStatus::Uploading,
                caption: None,
                attachment_id: None,
            });
        }

        match self
            .inner
            .api
            .upload_attachment(file_name, bytes, content_type)
            .await
        {
            Ok(response) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .upload_completed(&upload_id, response.id);
                Ok(upload_id)
            }
            Err(err) => {
                self.inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .upload_failed(&upload_id);
                Err(err)
            }
        }
    }

    pub fn set_upload_caption(&self, upload_id: &str, caption: Option<String>) {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .set_upload_caption(upload_id, caption);
    }

    pub fn remove_upload(&self, upload_id: &str) {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .remove_upload(upload_id);
    }

    pub fn clear_uploads(&self) {
        self.inner
            .state
            .lock()
            .expect("state lock poisoned")
            .clear_uploads();
    }

    // --- Visibility ---

    /// Visibility drives unread accounting: messages arriving in the open
    /// thread while hidden still count as unread, and becoming visible
    /// clears the open thread's count.
    pub async fn set_chat_visibility(&self, visible: bool) {
        let thread_to_clear = {
            let mut state = self.inner.state.lock().expect("state lock poisoned");
            state.chat_visible = visible;
            if visible {
                state.selected_thread_id.clone()
            } else {
                None
            }
        };
        if let Some(thread_id) = thread_to_clear {
            self.mark_thread_read(thread_id.as_str()).await;
        }
    }
}

impl Inner {
    fn self_user(&self) -> ChatUser {
        ChatUser {
            id: self.current_user_id,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            full_name: None,
            avatar: None,
        }
    }

    /// Global listeners live for the whole session and are attached at
    /// most once. They are never detached; thread switches must not lose
    /// unread/badge traffic.
    fn attach_global_listeners(self: &Arc<Self>) {
        if self.global_attached.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();
        self.bus.on("chat.unread.update", move |event| {
            let Event::UnreadUpdate {
                thread_id,
                unread_count,
            } = event
            else {
                return;
            };
            inner.handle_unread_update(thread_id, *unread_count);
        });

        let inner = self.clone();
        self.bus.on("unread.counts.initial", move |event| {
            let Event::UnreadCountsInitial { threads } = event else {
                return;
            };
            for entry in threads {
                inner.handle_unread_update(&entry.thread_id, entry.unread_count);
            }
        });

        let inner = self.clone();
        self.bus.on("notification.count", move |event| {
            let Event::NotificationCount { count } = event else {
                return;
            };
            inner.handle_notification_count(*count);
        });

        let inner = self.clone();
        self.bus.on("notification.connection.success", move |event| {
            let Event::NotificationConnectionSuccess { user_id, .. } = event else {
                return;
            };
            debug!(?user_id, "notification channel confirmed");
            inner.spawn_thread_refresh_now();
        });

        let inner = self.clone();
        self.bus.on("chat.error", move |event| {
            let Event::ChatError { code, message } = event else {
                return;
            };
            if code.as_deref() == Some(RATE_LIMIT_CODE) {
                inner.start_rate_limit_cooldown();
            }
            inner
                .state
                .lock()
                .expect("state lock poisoned")
                .last_error = Some(message.clone());
        });

        let inner = self.clone();
        self.bus.on("notification.error", move |event| {
            let Event::NotificationError { message } = event else {
                return;
            };
            error!(message, "notification channel failed");
            inner
                .state
                .lock()
                .expect("state lock poisoned")
                .last_error = Some(message.clone());
        });
    }

    /// A push-sourced unread count for a materialized thread is applied
    /// directly; for an unknown thread it is buffered and a thread refresh
    /// is kicked off so the thread materializes.
    fn handle_unread_update(self: &Arc<Self>, thread_id: &str, unread_count: u32) {
        self.unread
            .lock()
            .expect("unread lock poisoned")
            .record_push(thread_id, unread_count);

        let applied = self
            .state
            .lock()
            .expect("state lock poisoned")
            .apply_unread(thread_id, unread_count);
        if !applied {
            self.unread
                .lock()
                .expect("unread lock poisoned")
                .buffer_pending(thread_id, unread_count);
            debug!(thread_id, "unread push for unknown thread, refreshing list");
            self.spawn_thread_refresh_now();
        }
    }

    /// Debounced thread-list refresh on badge count changes. Repeated
    /// identical counts are ignored.
    fn handle_notification_count(self: &Arc<Self>, count: u64) {
        {
            let mut last = self
                .last_notification_count
                .lock()
                .expect("count lock poisoned");
            if *last == Some(count) {
                return;
            }
            *last = Some(count);
        }

        let inner = self.clone();
        let debounce = self.config.thread_refresh_debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.refresh_threads().await;
        });
        if let Some(previous) = self
            .refresh_debounce
            .lock()
            .expect("debounce lock poisoned")
            .replace(task)
        {
            previous.abort();
        }
    }

    fn spawn_thread_refresh_now(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            inner.refresh_threads().await;
        });
    }

    async fn refresh_threads(self: &Arc<Self>) {
        match self.api.list_threads(&ThreadFilters::default()).await {
            Ok(mut response) => {
                self.unread
                    .lock()
                    .expect("unread lock poisoned")
                    .apply_rest_snapshot(&mut response.results);
                self.state
                    .lock()
                    .expect("state lock poisoned")
                    .set_threads(response.results);
            }
            Err(err) => warn!("thread refresh failed: {}", err.detail()),
        }
    }

    /// Cooldown after a rate-limit rejection, counting down once a second.
    fn start_rate_limit_cooldown(self: &Arc<Self>) {
        let cooldown = self.config.rate_limit_cooldown_secs;
        self.state
            .lock()
            .expect("state lock poisoned")
            .rate_limit_seconds_left = cooldown;

        let inner = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                let mut state = inner.state.lock().expect("state lock poisoned");
                state.rate_limit_seconds_left = state.rate_limit_seconds_left.saturating_sub(1);
                if state.rate_limit_seconds_left == 0 {
                    state.last_error = None;
                    break;
                }
            }
        });
        if let Some(previous) = self
            .rate_limit_task
            .lock()
            .expect("rate limit lock poisoned")
            .replace(task)
        {
            previous.abort();
        }
    }

    /// Chat listeners are scoped to the open thread and re-attached on
    /// every thread switch.
    fn attach_chat_listeners(self: &Arc<Self>) {
        let mut ids = self.chat_listeners.lock().expect("listener lock poisoned");

        let inner = self.clone();
        ids.push((
            "chat.connected",
            self.bus.on("chat.connected", move |event| {
                let Event::ChatConnected { thread_id } = event else {
                    return;
                };
                debug!(thread_id, "chat socket open");
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .last_error = None;
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.connection.established",
            self.bus.on("chat.connection.established", move |event| {
                let Event::ConnectionEstablished { rate_limits } = event else {
                    return;
                };
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .rate_limits = rate_limits.unwrap_or_default();
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.message.new",
            self.bus.on("chat.message.new", move |event| {
                let Event::MessageNew { message } = event else {
                    return;
                };
                inner.handle_message_new(message);
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.message.updated",
            self.bus.on("chat.message.updated", move |event| {
                let Event::MessageUpdated { message } = event else {
                    return;
                };
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_message_update(message);
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.message.deleted",
            self.bus.on("chat.message.deleted", move |event| {
                let Event::MessageDeleted { message_id, .. } = event else {
                    return;
                };
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_message_delete(message_id);
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.typing.start",
            self.bus.on("chat.typing.start", move |event| {
                let Event::TypingStart {
                    user_id,
                    display_name,
                } = event
                else {
                    return;
                };
                if *user_id != inner.current_user_id {
                    inner.typing.start(*user_id, display_name.clone());
                }
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.typing.stop",
            self.bus.on("chat.typing.stop", move |event| {
                let Event::TypingStop { user_id } = event else {
                    return;
                };
                inner.typing.stop(*user_id);
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.reaction.added",
            self.bus.on("chat.reaction.added", move |event| {
                let Event::ReactionAdded {
                    message_id,
                    emoji,
                    user,
                } = event
                else {
                    return;
                };
                // Own reactions were applied optimistically already.
                if user.id == inner.current_user_id {
                    return;
                }
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_reaction_add(message_id, emoji, user.clone());
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.reaction.removed",
            self.bus.on("chat.reaction.removed", move |event| {
                let Event::ReactionRemoved {
                    message_id,
                    emoji,
                    user_id,
                } = event
                else {
                    return;
                };
                if *user_id == inner.current_user_id {
                    return;
                }
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .apply_reaction_remove(message_id, emoji, *user_id);
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.thread.updated",
            self.bus.on("chat.thread.updated", move |event| {
                let Event::ThreadUpdated { thread } = event else {
                    return;
                };
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .upsert_thread(thread.clone());
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.member.added",
            self.bus.on("chat.member.added", move |event| {
                let Event::MemberAdded { thread_id } = event else {
                    return;
                };
                inner.spawn_thread_reload(thread_id.clone());
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.member.removed",
            self.bus.on("chat.member.removed", move |event| {
                let Event::MemberRemoved { thread_id } = event else {
                    return;
                };
                inner.spawn_thread_reload(thread_id.clone());
            }),
        ));

        let inner = self.clone();
        ids.push((
            "chat.disconnected",
            self.bus.on("chat.disconnected", move |event| {
                let Event::ChatDisconnected { code, reason, .. } = event else {
                    return;
                };
                debug!(?code, reason, "chat socket closed");
                inner.typing.clear();
            }),
        ));
    }

    fn detach_chat_listeners(&self) {
        let mut ids = self.chat_listeners.lock().expect("listener lock poisoned");
        for (event, id) in ids.drain(..) {
            self.bus.off(event, id);
        }
    }

    fn handle_message_new(self: &Arc<Self>, message: &Message) {
        // Whatever they sent, they stopped typing.
        self.typing.stop(message.sender.id);

        let (effect, visible, thread_name) = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let effect = state.apply_message_new(message, self.current_user_id);
            let thread_name = state
                .thread(&message.thread_id)
                .map(|t| t.display_name())
                .unwrap_or_else(|| "Conversation".to_string());
            (effect, state.chat_visible, thread_name)
        };

        let own = message.sender.id == self.current_user_id;
        let in_open_thread = matches!(
            effect,
            ArrivalEffect::Appended | ArrivalEffect::ReplacedOptimistic
        );

        if !own && (!visible || effect == ArrivalEffect::OtherThread) {
            self.notifier.notify(ChatNotification {
                sender_name: message.sender.display_name(),
                thread_name,
                body: truncate_body(&message.content, NOTIFICATION_BODY_MAX_CHARS),
                thread_id: message.thread_id.clone(),
            });
        }

        // Reading along in the open, visible thread acks immediately.
        if !own && in_open_thread && visible {
            let inner = self.clone();
            let thread_id = message.thread_id.clone();
            let message_id = message.id.clone();
            tokio::spawn(async move {
                inner.sockets.send_chat(&ChatClientCommand::MessageRead { message_id });
                inner
                    .unread
                    .lock()
                    .expect("unread lock poisoned")
                    .record_push(&thread_id, 0);
                inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .mark_thread_read_local(&thread_id);
                if let Err(err) = inner.api.mark_thread_read(&thread_id).await {
                    warn!(thread_id, "failed to mark thread read: {}", err.detail());
                }
            });
        }

        // A message for a thread we do not know yet means the list is
        // stale.
        let known = {
            let state = self.state.lock().expect("state lock poisoned");
            state.thread(&message.thread_id).is_some()
        };
        if !known {
            self.spawn_thread_refresh_now();
        }
    }

    fn spawn_thread_reload(self: &Arc<Self>, thread_id: Option<String>) {
        let Some(thread_id) = thread_id else {
            self.spawn_thread_refresh_now();
            return;
        };
        let inner = self.clone();
        tokio::spawn(async move {
            match inner.api.get_thread(&thread_id).await {
                Ok(thread) => inner
                    .state
                    .lock()
                    .expect("state lock poisoned")
                    .upsert_thread(thread),
                Err(err) => warn!(thread_id, "thread reload failed: {}", err.detail()),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::token::MemoryTokenProvider;
    use std::time::Duration;

    fn client_with(config: ChatConfig) -> ChatClient {
        // No token: the notification socket task never attempts I/O.
        ChatClient::new(
            config,
            Arc::new(MemoryTokenProvider::new(None)),
            Arc::new(NoopNotifier),
            1,
        )
    }

    fn client() -> ChatClient {
        // A huge token-retry budget keeps the tokenless socket task from
        // reaching its terminal error inside the test window.
        let mut config = ChatConfig::default();
        config.reconnect.max_token_retries = u32::MAX;
        client_with(config)
    }

    fn seeded_message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            sender: ChatUser {
                id: 2,
                username: "user2".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                full_name: None,
                avatar: None,
            },
            content: content.to_string(),
            reply_to: None,
            attachments: Vec::new(),
            has_attachments: false,
            reactions: Vec::new(),
            created_at: chrono::Utc::now(),
            edited_at: None,
            deleted_at: None,
            is_deleted: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_message_reports_unsendable_states() {
        let client = client();

        // Nothing selected: nothing to send to.
        assert_eq!(client.send_message("hello", None).await, Ok(false));

        {
            let mut state = client.inner.state.lock().unwrap();
            state.select_thread("t1");
            state.rate_limit_seconds_left = 30;
        }
        // Cooldown active: blocked before any request is made.
        assert_eq!(client.send_message("hello", None).await, Ok(false));
        assert!(client.with_state(|s| s.messages.is_empty()));
    }

    #[tokio::test]
    async fn failed_delete_restores_the_original_message() {
        // Port 9 refuses connections, so the DELETE fails fast.
        let mut config = ChatConfig::default();
        config.api_base = "http://127.0.0.1:9".to_string();
        config.reconnect.max_token_retries = u32::MAX;
        let client = client_with(config);

        {
            let mut state = client.inner.state.lock().unwrap();
            state.select_thread("t1");
            state.messages.push(seeded_message("m1", "still here"));
        }

        assert!(client.delete_message("m1").await.is_err());
        client.with_state(|s| {
            assert_eq!(s.messages.len(), 1);
            assert_eq!(s.messages[0].content, "still here");
            assert!(!s.messages[0].is_deleted);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_error_starts_countdown_and_clears() {
        let client = client();
        client.start();

        client.bus().emit(&Event::ChatError {
            code: Some(RATE_LIMIT_CODE.to_string()),
            message: "Rate limit exceeded".to_string(),
        });
        assert_eq!(client.with_state(|s| s.rate_limit_seconds_left), 60);
        assert!(client.with_state(|s| s.last_error.is_some()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        let halfway = client.with_state(|s| s.rate_limit_seconds_left);
        assert!(halfway > 0 && halfway < 60, "halfway: {halfway}");

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(client.with_state(|s| s.rate_limit_seconds_left), 0);
        assert!(client.with_state(|s| s.last_error.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn unread_push_for_unknown_thread_counts_toward_total() {
        let client = client();
        client.start();

        client.bus().emit(&Event::UnreadUpdate {
            thread_id: "t-unknown".to_string(),
            unread_count: 4,
        });

        assert_eq!(client.total_unread(), 4);
        // The push is buffered, not materialized.
        assert!(client.with_state(|s| s.threads.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_unread_seed_is_buffered_per_thread() {
        let client = client();
        client.start();

        client.bus().emit(&Event::UnreadCountsInitial {
            threads: vec![
                intrachat_shared::ThreadUnread {
                    thread_id: "t1".to_string(),
                    unread_count: 2,
                },
                intrachat_shared::ThreadUnread {
                    thread_id: "t2".to_string(),
                    unread_count: 3,
                },
            ],
        });

        assert_eq!(client.total_unread(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_socket_fails_terminally_without_token() {
        let client = client_with(ChatConfig::default());
        client.start();

        // Six 10s token retries, then a terminal notification.error.
        tokio::time::sleep(Duration::from_secs(70)).await;
        let error = client.with_state(|s| s.last_error.clone());
        assert!(
            error.as_deref().is_some_and(|e| e.contains("token")),
            "expected token failure, got {error:?}"
        );
    }
}
