//! Shared data models for the intrachat backend API and WebSocket protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used for client-generated message ids before server confirmation.
pub const TEMP_ID_PREFIX: &str = "temp-";

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatUser {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ChatUser {
    /// Best-effort display name: full name, first/last, then username.
    pub fn display_name(&self) -> String {
        if let Some(full) = &self.full_name {
            if !full.trim().is_empty() {
                return full.clone();
            }
        }
        let joined = format!("{} {}", self.first_name, self.last_name);
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
        if !self.username.is_empty() {
            return self.username.clone();
        }
        "User".to_string()
    }
}

// --- Threads ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreadRole {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PostingMode {
    All,
    AdminsOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSettings {
    pub posting_mode: PostingMode,
    pub members_can_add_others: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastMessage {
    pub id: String,
    pub sender: ChatUser,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: ThreadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_settings: Option<GroupSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_role: Option<ThreadRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn display_name(&self) -> String {
        self.chat_name
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "Conversation".to_string())
    }
}

// --- Messages ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Non-owning summary of the message being replied to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyRef {
    pub id: String,
    pub content: String,
    pub sender: ChatUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reaction {
    pub emoji: String,
    pub users: Vec<ChatUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    /// Owning thread. The backend sends `thread_id` on socket events and
    /// `thread` on REST responses.
    #[serde(alias = "thread")]
    pub thread_id: String,
    pub sender: ChatUser,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<ReplyRef>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Message {
    /// Whether this is an unconfirmed optimistic entry.
    pub fn is_temp(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// Add `user` to the reaction set for `emoji`, creating the entry if
    /// needed. Returns false if the user was already present.
    pub fn add_reaction_user(&mut self, emoji: &str, user: ChatUser) -> bool {
        if let Some(reaction) = self.reactions.iter_mut().find(|r| r.emoji == emoji) {
            if reaction.users.iter().any(|u| u.id == user.id) {
                return false;
            }
            reaction.users.push(user);
        } else {
            self.reactions.push(Reaction {
                emoji: emoji.to_string(),
                users: vec![user],
            });
        }
        true
    }

    /// Remove `user_id` from the reaction set for `emoji`, dropping the
    /// emoji entry once its user set is empty. Returns false if the user
    /// had no such reaction.
    pub fn remove_reaction_user(&mut self, emoji: &str, user_id: i64) -> bool {
        let Some(reaction) = self.reactions.iter_mut().find(|r| r.emoji == emoji) else {
            return false;
        };
        let before = reaction.users.len();
        reaction.users.retain(|u| u.id != user_id);
        let removed = reaction.users.len() != before;
        self.reactions.retain(|r| !r.users.is_empty());
        removed
    }

    /// Replace the content with a tombstone, keeping the entry in the list.
    pub fn tombstone(&mut self) {
        self.content = "[Message deleted]".to_string();
        self.is_deleted = true;
        if self.deleted_at.is_none() {
            self.deleted_at = Some(Utc::now());
        }
    }
}

// --- Rate limits ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub limit: u32,
    pub window: u32,
    pub current: u32,
    pub remaining: u32,
}

impl RateLimitBucket {
    pub fn new(limit: u32, window: u32) -> Self {
        Self {
            limit,
            window,
            current: 0,
            remaining: limit,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    pub message_send: RateLimitBucket,
    pub reaction_add: RateLimitBucket,
    pub typing_start: RateLimitBucket,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            message_send: RateLimitBucket::new(60, 60),
            reaction_add: RateLimitBucket::new(120, 60),
            typing_start: RateLimitBucket::new(30, 60),
        }
    }
}

// --- Uploads ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadProgress {
    pub id: String,
    pub file_name: String,
    pub progress: u8,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

// --- Pagination ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadListResponse {
    pub count: u64,
    pub results: Vec<Thread>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePage {
    pub results: Vec<Message>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

/// Per-thread unread count as delivered by `unread.counts.initial`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadUnread {
    pub thread_id: String,
    pub unread_count: u32,
}

// --- Request bodies ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateThreadRequest {
    #[serde(rename = "type")]
    pub r#type: ThreadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ThreadRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoveMemberRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRoleRequest {
    pub user_id: i64,
    pub role: ThreadRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpdateGroupSettingsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posting_mode: Option<PostingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_can_add_others: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentUploadResponse {
    pub id: String,
}

/// Query filters for the thread list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadFilters {
    pub search: Option<String>,
    pub page: Option<u32>,
}
