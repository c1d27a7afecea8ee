//! Synchronization core state.
//!
//! All mutations are synchronous methods on [`ChatState`]; the client wraps
//! one instance in a mutex and applies socket events and REST responses to
//! it. Keeping the transitions pure makes the merge rules (optimistic
//! confirmation, dedup, tombstoning) testable without any I/O.

use intrachat_shared::{
    Message, RateLimits, Thread, ThreadRole, UploadProgress, UploadStatus, TEMP_ID_PREFIX,
};

/// What applying an inbound `message.new` did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalEffect {
    /// Appended to the open thread's message list.
    Appended,
    /// Confirmed an optimistic entry in place.
    ReplacedOptimistic,
    /// Already present; nothing changed.
    DuplicateIgnored,
    /// Belongs to a thread other than the open one.
    OtherThread,
}

#[derive(Debug, Default)]
pub struct ChatState {
    pub threads: Vec<Thread>,
    pub selected_thread_id: Option<String>,
    /// Messages of the selected thread, oldest first.
    pub messages: Vec<Message>,
    /// Cursor for loading older messages, `None` when exhausted.
    pub older_cursor: Option<String>,
    pub uploads: Vec<UploadProgress>,
    pub rate_limits: RateLimits,
    /// Seconds left on a rate-limit cooldown; zero when not limited.
    pub rate_limit_seconds_left: u32,
    /// Whether the chat surface is currently visible to the user.
    pub chat_visible: bool,
    pub last_error: Option<String>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Threads ---

    pub fn set_threads(&mut self, threads: Vec<Thread>) {
        self.threads = threads;
    }

    /// Insert or replace a thread by id.
    pub fn upsert_thread(&mut self, thread: Thread) {
        match self.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(existing) => *existing = thread,
            None => self.threads.push(thread),
        }
    }

    pub fn remove_thread(&mut self, thread_id: &str) {
        self.threads.retain(|t| t.id != thread_id);
        if self.selected_thread_id.as_deref() == Some(thread_id) {
            self.selected_thread_id = None;
            self.messages.clear();
            self.older_cursor = None;
        }
    }

    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    pub fn selected_thread(&self) -> Option<&Thread> {
        self.selected_thread_id
            .as_deref()
            .and_then(|id| self.thread(id))
    }

    /// Apply an authoritative per-thread unread count. Returns false when
    /// the thread is not materialized yet.
    pub fn apply_unread(&mut self, thread_id: &str, unread_count: u32) -> bool {
        match self.threads.iter_mut().find(|t| t.id == thread_id) {
            Some(thread) => {
                thread.unread_count = unread_count;
                true
            }
            None => false,
        }
    }

    pub fn mark_thread_read_local(&mut self, thread_id: &str) {
        if let Some(thread) = self.threads.iter_mut().find(|t| t.id == thread_id) {
            thread.unread_count = 0;
        }
    }

    /// Switch the open thread, clearing per-thread message state. Returns
    /// false when the thread was already selected.
    pub fn select_thread(&mut self, thread_id: &str) -> bool {
        if self.selected_thread_id.as_deref() == Some(thread_id) {
            return false;
        }
        self.selected_thread_id = Some(thread_id.to_string());
        self.messages.clear();
        self.older_cursor = None;
        true
    }

    // --- Messages ---

    /// Replace the message list with a freshly fetched newest-first page,
    /// stored oldest first.
    pub fn set_messages_from_page(&mut self, mut newest_first: Vec<Message>, next: Option<String>) {
        newest_first.reverse();
        self.messages = newest_first;
        self.older_cursor = next;
    }

    /// Prepend an older newest-first page, skipping ids already present.
    pub fn prepend_older_page(&mut self, mut newest_first: Vec<Message>, next: Option<String>) {
        newest_first.reverse();
        newest_first.retain(|m| !self.messages.iter().any(|e| e.id == m.id));
        newest_first.append(&mut self.messages);
        self.messages = newest_first;
        self.older_cursor = next;
    }

    /// Append an optimistic entry (id must carry the temp prefix).
    pub fn insert_optimistic(&mut self, message: Message) {
        debug_assert!(message.is_temp());
        self.messages.push(message);
    }

    /// Swap a temp entry for its confirmed form in place, preserving list
    /// position. If the temp entry is gone, the confirmed message is
    /// appended unless already present.
    pub fn confirm_optimistic(&mut self, temp_id: &str, confirmed: Message) {
        if self.messages.iter().any(|m| m.id == confirmed.id) {
            self.messages.retain(|m| m.id != temp_id);
            return;
        }
        match self.messages.iter_mut().find(|m| m.id == temp_id) {
            Some(slot) => *slot = confirmed,
            None => self.messages.push(confirmed),
        }
    }

    /// Roll back a failed optimistic send.
    pub fn remove_optimistic(&mut self, temp_id: &str) {
        self.messages.retain(|m| m.id != temp_id);
    }

    /// Merge an inbound `message.new`. Thread metadata (last message,
    /// ordering timestamp, unread count) is updated regardless of which
    /// thread is open; the message list only changes for the open thread.
    pub fn apply_message_new(&mut self, message: &Message, current_user_id: i64) -> ArrivalEffect {
        let own = message.sender.id == current_user_id;
        let selected = self.selected_thread_id.as_deref() == Some(message.thread_id.as_str());

        if let Some(thread) = self.threads.iter_mut().find(|t| t.id == message.thread_id) {
            thread.updated_at = message.created_at;
            thread.last_message = Some(intrachat_shared::LastMessage {
                id: message.id.clone(),
                sender: message.sender.clone(),
                content: message.content.clone(),
                created_at: message.created_at,
                has_attachments: message.has_attachments || !message.attachments.is_empty(),
            });
            if !own && (!selected || !self.chat_visible) {
                thread.unread_count += 1;
            }
        }

        if !selected {
            return ArrivalEffect::OtherThread;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return ArrivalEffect::DuplicateIgnored;
        }

        // An own message arriving over the socket confirms the oldest
        // matching optimistic entry instead of duplicating it.
        if own {
            if let Some(slot) = self
                .messages
                .iter_mut()
                .find(|m| m.is_temp() && m.content == message.content)
            {
                *slot = message.clone();
                return ArrivalEffect::ReplacedOptimistic;
            }
        }

        self.messages.push(message.clone());
        ArrivalEffect::Appended
    }

    /// Replace an edited message in place; ignored when not loaded.
    pub fn apply_message_update(&mut self, message: &Message) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *slot = message.clone();
        }
    }

    /// Tombstone a deleted message, keeping its slot in the list.
    pub fn apply_message_delete(&mut self, message_id: &str) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.tombstone();
        }
    }

    pub fn apply_reaction_add(
        &mut self,
        message_id: &str,
        emoji: &str,
        user: intrachat_shared::ChatUser,
    ) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => message.add_reaction_user(emoji, user),
            None => false,
        }
    }

    pub fn apply_reaction_remove(&mut self, message_id: &str, emoji: &str, user_id: i64) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => message.remove_reaction_user(emoji, user_id),
            None => false,
        }
    }

    /// Replace a message wholesale with a REST-fetched copy.
    pub fn replace_message(&mut self, message: Message) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *slot = message;
        }
    }

    // --- Uploads ---

    pub fn upload_started(&mut self, upload: UploadProgress) {
        self.uploads.push(upload);
    }

    pub fn upload_progress(&mut self, upload_id: &str, progress: u8) {
        if let Some(upload) = self.uploads.iter_mut().find(|u| u.id == upload_id) {
            upload.progress = progress.min(100);
        }
    }

    pub fn upload_completed(&mut self, upload_id: &str, attachment_id: String) {
        if let Some(upload) = self.uploads.iter_mut().find(|u| u.id == upload_id) {
            upload.progress = 100;
            upload.status = UploadStatus::Completed;
            upload.attachment_id = Some(attachment_id);
        }
    }

    pub fn upload_failed(&mut self, upload_id: &str) {
        if let Some(upload) = self.uploads.iter_mut().find(|u| u.id == upload_id) {
            upload.status = UploadStatus::Error;
        }
    }

    pub fn set_upload_caption(&mut self, upload_id: &str, caption: Option<String>) {
        if let Some(upload) = self.uploads.iter_mut().find(|u| u.id == upload_id) {
            upload.caption = caption;
        }
    }

    pub fn remove_upload(&mut self, upload_id: &str) {
        self.uploads.retain(|u| u.id != upload_id);
    }

    pub fn clear_uploads(&mut self) {
        self.uploads.clear();
    }

    /// Completed uploads ready to attach to the next send, in order.
    pub fn completed_attachment_ids(&self) -> Vec<String> {
        self.uploads
            .iter()
            .filter(|u| u.status == UploadStatus::Completed)
            .filter_map(|u| u.attachment_id.clone())
            .collect()
    }

    pub fn clear_completed_uploads(&mut self) {
        self.uploads.retain(|u| u.status != UploadStatus::Completed);
    }

    // --- Derived views ---

    /// Threads ordered by most recent activity.
    pub fn sorted_threads(&self) -> Vec<&Thread> {
        let mut threads: Vec<&Thread> = self.threads.iter().collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    pub fn unread_threads_count(&self) -> usize {
        self.threads.iter().filter(|t| t.unread_count > 0).count()
    }

    /// Whether the current user may post in the given thread.
    pub fn can_post(&self, thread: &Thread) -> bool {
        match &thread.group_settings {
            Some(settings)
                if settings.posting_mode == intrachat_shared::PostingMode::AdminsOnly =>
            {
                matches!(
                    thread.my_role,
                    Some(ThreadRole::Admin) | Some(ThreadRole::Owner)
                )
            }
            _ => true,
        }
    }

    /// Whether the current user may add members to the given thread.
    pub fn can_add_members(&self, thread: &Thread) -> bool {
        match thread.my_role {
            Some(ThreadRole::Admin) | Some(ThreadRole::Owner) => true,
            Some(ThreadRole::Member) => thread
                .group_settings
                .as_ref()
                .map(|s| s.members_can_add_others)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Removing members and changing roles is admin/owner only.
    pub fn can_manage_members(&self, thread: &Thread) -> bool {
        matches!(
            thread.my_role,
            Some(ThreadRole::Admin) | Some(ThreadRole::Owner)
        )
    }

    /// No optimistic entry left in the list shares an id prefix with a
    /// confirmed one; used by tests and debug assertions.
    pub fn has_pending_optimistic(&self) -> bool {
        self.messages.iter().any(|m| m.id.starts_with(TEMP_ID_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use intrachat_shared::{ChatUser, GroupSettings, PostingMode, ThreadType};

    fn user(id: i64) -> ChatUser {
        ChatUser {
            id,
            username: format!("user{id}"),
            first_name: String::new(),
            last_name: String::new(),
            full_name: None,
            avatar: None,
        }
    }

    fn message(id: &str, thread_id: &str, sender_id: i64, content: &str) -> Message {
        Message {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            sender: user(sender_id),
            content: content.to_string(),
            reply_to: None,
            attachments: Vec::new(),
            has_attachments: false,
            reactions: Vec::new(),
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            is_deleted: false,
        }
    }

    fn thread(id: &str) -> Thread {
        Thread {
            id: id.to_string(),
            r#type: ThreadType::Group,
            title: Some(id.to_string()),
            chat_name: None,
            group_settings: None,
            my_role: Some(ThreadRole::Member),
            last_message: None,
            unread_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn optimistic_send_confirm_scenario() {
        // Select t1, send "hello" optimistically, server acks with m100.
        let mut state = ChatState::new();
        state.set_threads(vec![thread("t1")]);
        state.select_thread("t1");

        state.insert_optimistic(message("temp-abc", "t1", 1, "hello"));
        assert!(state.has_pending_optimistic());
        assert_eq!(state.messages.len(), 1);

        state.confirm_optimistic("temp-abc", message("m100", "t1", 1, "hello"));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, "m100");
        assert!(!state.has_pending_optimistic());
    }

    #[test]
    fn confirm_preserves_list_position() {
        let mut state = ChatState::new();
        state.select_thread("t1");
        state.messages.push(message("m1", "t1", 2, "first"));
        state.insert_optimistic(message("temp-x", "t1", 1, "mine"));
        state.messages.push(message("m2", "t1", 2, "later"));

        state.confirm_optimistic("temp-x", message("m3", "t1", 1, "mine"));
        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3", "m2"]);
    }

    #[test]
    fn socket_echo_confirms_instead_of_duplicating() {
        let mut state = ChatState::new();
        state.set_threads(vec![thread("t1")]);
        state.select_thread("t1");
        state.insert_optimistic(message("temp-x", "t1", 1, "hello"));

        let echo = message("m100", "t1", 1, "hello");
        assert_eq!(
            state.apply_message_new(&echo, 1),
            ArrivalEffect::ReplacedOptimistic
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, "m100");

        // The same frame again is a no-op.
        assert_eq!(
            state.apply_message_new(&echo, 1),
            ArrivalEffect::DuplicateIgnored
        );
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn cross_thread_arrival_bumps_unread_without_touching_open_list() {
        let mut state = ChatState::new();
        state.set_threads(vec![thread("t1"), thread("t2")]);
        state.select_thread("t1");
        state.chat_visible = true;

        let incoming = message("m1", "t2", 9, "psst");
        assert_eq!(state.apply_message_new(&incoming, 1), ArrivalEffect::OtherThread);
        assert!(state.messages.is_empty());

        let t2 = state.thread("t2").unwrap();
        assert_eq!(t2.unread_count, 1);
        assert_eq!(t2.last_message.as_ref().unwrap().id, "m1");
        assert_eq!(state.thread("t1").unwrap().unread_count, 0);
    }

    #[test]
    fn arrival_in_hidden_open_thread_still_counts_unread() {
        let mut state = ChatState::new();
        state.set_threads(vec![thread("t1")]);
        state.select_thread("t1");
        state.chat_visible = false;

        let incoming = message("m1", "t1", 9, "hi");
        assert_eq!(state.apply_message_new(&incoming, 1), ArrivalEffect::Appended);
        assert_eq!(state.thread("t1").unwrap().unread_count, 1);

        // Own messages never count as unread.
        state.chat_visible = true;
        let own = message("m2", "t1", 1, "reply");
        state.apply_message_new(&own, 1);
        assert_eq!(state.thread("t1").unwrap().unread_count, 1);
    }

    #[test]
    fn reaction_add_then_remove_is_idempotent() {
        let mut state = ChatState::new();
        state.select_thread("t1");
        state.messages.push(message("m1", "t1", 2, "hi"));

        assert!(state.apply_reaction_add("m1", "👍", user(3)));
        // Duplicate add from the other socket path is rejected.
        assert!(!state.apply_reaction_add("m1", "👍", user(3)));
        assert_eq!(state.messages[0].reactions.len(), 1);
        assert_eq!(state.messages[0].reactions[0].users.len(), 1);

        assert!(state.apply_reaction_remove("m1", "👍", 3));
        assert!(!state.apply_reaction_remove("m1", "👍", 3));
        // Empty emoji entries are never retained.
        assert!(state.messages[0].reactions.is_empty());
    }

    #[test]
    fn delete_tombstones_in_place() {
        let mut state = ChatState::new();
        state.select_thread("t1");
        state.messages.push(message("m1", "t1", 2, "one"));
        state.messages.push(message("m2", "t1", 2, "two"));

        state.apply_message_delete("m1");
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content, "[Message deleted]");
        assert!(state.messages[0].is_deleted);
        assert_eq!(state.messages[1].content, "two");
    }

    #[test]
    fn older_page_prepends_without_duplicates() {
        let mut state = ChatState::new();
        state.select_thread("t1");
        state.set_messages_from_page(
            vec![message("m3", "t1", 2, "c"), message("m2", "t1", 2, "b")],
            Some("cursor1".into()),
        );
        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        state.prepend_older_page(
            vec![message("m2", "t1", 2, "b"), message("m1", "t1", 2, "a")],
            None,
        );
        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert!(state.older_cursor.is_none());
    }

    #[test]
    fn threads_sort_by_recency() {
        let mut state = ChatState::new();
        let mut a = thread("a");
        let mut b = thread("b");
        a.updated_at = Utc::now() - ChronoDuration::hours(1);
        b.updated_at = Utc::now();
        state.set_threads(vec![a, b]);

        let sorted: Vec<&str> = state.sorted_threads().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(sorted, vec!["b", "a"]);
    }

    #[test]
    fn posting_permissions_follow_group_settings() {
        let state = ChatState::new();
        let mut t = thread("t1");
        t.group_settings = Some(GroupSettings {
            posting_mode: PostingMode::AdminsOnly,
            members_can_add_others: false,
            updated_at: None,
            updated_by: None,
        });

        t.my_role = Some(ThreadRole::Member);
        assert!(!state.can_post(&t));
        assert!(!state.can_add_members(&t));
        assert!(!state.can_manage_members(&t));

        t.my_role = Some(ThreadRole::Admin);
        assert!(state.can_post(&t));
        assert!(state.can_manage_members(&t));

        t.group_settings.as_mut().unwrap().posting_mode = PostingMode::All;
        t.my_role = Some(ThreadRole::Member);
        assert!(state.can_post(&t));

        t.group_settings.as_mut().unwrap().members_can_add_others = true;
        assert!(state.can_add_members(&t));
    }

    #[test]
    fn uploads_track_lifecycle_and_captions() {
        let mut state = ChatState::new();
        state.upload_started(UploadProgress {
            id: "u1".into(),
            file_name: "report.pdf".into(),
            progress: 0,
            status: UploadStatus::Uploading,
            caption: None,
            attachment_id: None,
        });

        state.upload_progress("u1", 50);
        state.set_upload_caption("u1", Some("Q3 report".into()));
        state.upload_completed("u1", "att9".into());

        assert_eq!(state.completed_attachment_ids(), vec!["att9".to_string()]);
        assert_eq!(state.uploads[0].caption.as_deref(), Some("Q3 report"));
        assert_eq!(state.uploads[0].progress, 100);

        state.clear_completed_uploads();
        assert!(state.uploads.is_empty());
    }
}
