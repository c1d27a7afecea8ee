//! Wire protocol for the two WebSocket channels.
//!
//! Both channels speak JSON objects discriminated by a dotted `type` field.
//! The chat channel (`/ws/internal-chat/threads/{id}/`) carries per-thread
//! traffic; the notification channel (`/ws/notifications/`) carries global
//! unread/badge traffic.

use serde::{Deserialize, Serialize};

use crate::models::{ChatUser, Message, RateLimits, Thread, ThreadUnread};

// --- Outbound (chat channel) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChatClientCommand {
    #[serde(rename = "message.send")]
    MessageSend {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default)]
        attachment_ids: Vec<String>,
    },
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(rename = "message.read")]
    MessageRead { message_id: String },
    #[serde(rename = "reaction.add")]
    ReactionAdd { message_id: String, emoji: String },
    #[serde(rename = "reaction.remove")]
    ReactionRemove { message_id: String, emoji: String },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

impl ChatClientCommand {
    /// Wire form of this command. Serializing these enums cannot fail; the
    /// empty-string fallback exists only to avoid a panic path.
    pub fn frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// --- Inbound (chat channel) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChatServerEvent {
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        #[serde(default)]
        rate_limits: Option<RateLimits>,
    },
    #[serde(rename = "message.new")]
    MessageNew { message: Message },
    #[serde(rename = "message.updated")]
    MessageUpdated { message: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        message_id: String,
        #[serde(default)]
        thread_id: Option<String>,
    },
    #[serde(rename = "typing.start")]
    TypingStart {
        #[serde(default)]
        user: Option<ChatUser>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "typing.stop")]
    TypingStop {
        #[serde(default)]
        user: Option<ChatUser>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "receipt.read")]
    ReceiptRead {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "reaction.added")]
    ReactionAdded {
        message_id: String,
        emoji: String,
        user_id: i64,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        first_name: Option<String>,
        #[serde(default)]
        last_name: Option<String>,
        #[serde(default)]
        full_name: Option<String>,
    },
    #[serde(rename = "reaction.removed")]
    ReactionRemoved {
        message_id: String,
        emoji: String,
        user_id: i64,
    },
    #[serde(rename = "member.added")]
    MemberAdded {
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "member.removed")]
    MemberRemoved {
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
    },
    #[serde(rename = "thread.updated")]
    ThreadUpdated { thread: Thread },
    // The backend pushes unread updates on both channels; the legacy tag is
    // still emitted by older backend versions.
    #[serde(rename = "chat.unread.update", alias = "chat.unread.count.update")]
    UnreadUpdate { thread_id: String, unread_count: u32 },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
}

impl ChatServerEvent {
    /// User id carried by a typing event, whichever form the backend used.
    pub fn typing_user_id(user: &Option<ChatUser>, user_id: &Option<i64>) -> Option<i64> {
        user.as_ref().map(|u| u.id).or(*user_id)
    }
}

/// Build a `ChatUser` from the flat fields of a reaction event.
pub fn reaction_event_user(
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    full_name: Option<String>,
) -> ChatUser {
    ChatUser {
        id: user_id,
        username: username.unwrap_or_default(),
        first_name: first_name.unwrap_or_default(),
        last_name: last_name.unwrap_or_default(),
        full_name,
        avatar: None,
    }
}

// --- Inbound (notification channel) ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NotificationServerEvent {
    #[serde(rename = "notification.count")]
    NotificationCount { count: u64 },
    #[serde(rename = "chat.unread.update", alias = "chat.unread.count.update")]
    UnreadUpdate { thread_id: String, unread_count: u32 },
    #[serde(rename = "unread.counts.initial")]
    UnreadCountsInitial {
        #[serde(default)]
        threads: Vec<ThreadUnread>,
    },
    #[serde(rename = "connection.success")]
    ConnectionSuccess {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        user_id: Option<i64>,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        unread_count: Option<u32>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
}

/// Result of parsing an inbound frame: a known event, or an unrecognized
/// `type` forwarded generically with its raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent<E> {
    Known(E),
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

/// Parse a frame, falling back to generic forwarding for unknown `type`
/// tags. Frames without a string `type` field are a parse error.
pub fn parse_event<E: serde::de::DeserializeOwned>(
    text: &str,
) -> Result<ParsedEvent<E>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match E::deserialize(value.clone()) {
        Ok(event) => Ok(ParsedEvent::Known(event)),
        Err(err) => {
            if let Some(kind) = value.get("type").and_then(|t| t.as_str()) {
                Ok(ParsedEvent::Other {
                    kind: kind.to_string(),
                    data: value,
                })
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_command_serializes_with_dotted_type_tag() {
        let cmd = ChatClientCommand::ReactionAdd {
            message_id: "m1".into(),
            emoji: "👍".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "reaction.add");
        assert_eq!(json["message_id"], "m1");
    }

    #[test]
    fn message_send_command_omits_absent_reply_to() {
        let cmd = ChatClientCommand::MessageSend {
            content: "hi".into(),
            reply_to: None,
            attachment_ids: vec!["att1".into()],
        };
        let json: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "message.send");
        assert_eq!(json["attachment_ids"][0], "att1");
        assert!(json.get("reply_to").is_none());
    }

    #[test]
    fn heartbeat_frames_use_the_typed_commands() {
        assert_eq!(ChatClientCommand::Ping.frame(), r#"{"type":"ping"}"#);
        assert_eq!(ChatClientCommand::Pong.frame(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn unread_update_accepts_legacy_tag() {
        let legacy = r#"{"type":"chat.unread.count.update","thread_id":"t1","unread_count":4}"#;
        let parsed: NotificationServerEvent = serde_json::from_str(legacy).unwrap();
        assert_eq!(
            parsed,
            NotificationServerEvent::UnreadUpdate {
                thread_id: "t1".into(),
                unread_count: 4
            }
        );
    }

    #[test]
    fn unknown_type_is_forwarded_generically() {
        let raw = r#"{"type":"announcement.new","title":"hi"}"#;
        match parse_event::<NotificationServerEvent>(raw).unwrap() {
            ParsedEvent::Other { kind, data } => {
                assert_eq!(kind, "announcement.new");
                assert_eq!(data["title"], "hi");
            }
            other => panic!("expected generic forward, got {other:?}"),
        }
    }

    #[test]
    fn frame_without_type_is_a_parse_error() {
        assert!(parse_event::<NotificationServerEvent>(r#"{"count":3}"#).is_err());
        assert!(parse_event::<NotificationServerEvent>("not json").is_err());
    }
}
