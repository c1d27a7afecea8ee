//! Dual WebSocket transport.
//!
//! Two independent sockets: a global notification channel that lives for the
//! whole session, and a per-thread chat channel that is torn down and
//! reconnected as the user moves between threads. Each socket is normalized
//! into [`Event`] values on the shared bus; neither knows about the other.

pub mod policy;
mod socket;

use std::sync::{Arc, Mutex};

use intrachat_shared::{
    parse_event, ChatClientCommand, ChatServerEvent, NotificationServerEvent, ParsedEvent,
};
use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::events::{Event, EventBus};
use crate::token::TokenProvider;
pub use policy::ConnectionState;
use socket::{OutboundSender, SocketHandle, SocketHooks};

struct Sockets {
    notifications: Option<SocketHandle>,
    chat: Option<(String, SocketHandle)>,
}

/// Owns both socket lifecycles and feeds normalized events to the bus.
pub struct SocketManager {
    config: ChatConfig,
    tokens: Arc<dyn TokenProvider>,
    bus: EventBus,
    sockets: Mutex<Sockets>,
}

impl SocketManager {
    pub fn new(config: ChatConfig, tokens: Arc<dyn TokenProvider>, bus: EventBus) -> Self {
        Self {
            config,
            tokens,
            bus,
            sockets: Mutex::new(Sockets {
                notifications: None,
                chat: None,
            }),
        }
    }

    /// Connect the global notification socket. Idempotent while a
    /// connection is open or being established.
    pub fn connect_notifications(&self) {
        let mut sockets = self.sockets.lock().expect("socket lock poisoned");
        if let Some(handle) = &sockets.notifications {
            if handle.state().is_active() {
                debug!("notification socket already active");
                return;
            }
        }

        let tokens = self.tokens.clone();
        let config = self.config.clone();
        let bus = self.bus.clone();
        let bus_open = bus.clone();
        let bus_close = bus.clone();
        let bus_terminal = bus.clone();

        let hooks = SocketHooks {
            url: Box::new(move || {
                tokens
                    .access_token()
                    .map(|token| config.notifications_url(&token))
            }),
            on_frame: Box::new(move |text, outbound| {
                handle_notification_frame(&bus, text, outbound);
            }),
            on_open: Box::new(move || bus_open.emit(&Event::NotificationConnected)),
            on_close: Box::new(move |code, reason| {
                bus_close.emit(&Event::NotificationDisconnected {
                    code,
                    reason: reason.to_string(),
                });
            }),
            on_terminal: Box::new(move |reason| {
                bus_terminal.emit(&Event::NotificationError {
                    message: reason.to_string(),
                });
            }),
        };

        sockets.notifications = Some(SocketHandle::spawn(
            "notifications",
            self.config.reconnect.clone(),
            self.config.heartbeat_interval,
            ChatClientCommand::Ping.frame(),
            hooks,
        ));
    }

    /// Connect the chat socket for `thread_id`. A connection to the same
    /// thread is left alone; a connection to a different thread is torn
    /// down first.
    pub fn connect_chat(&self, thread_id: &str) {
        let mut sockets = self.sockets.lock().expect("socket lock poisoned");
        if let Some((current, handle)) = &sockets.chat {
            if current == thread_id && handle.state().is_active() {
                debug!(thread_id, "chat socket already active for thread");
                return;
            }
            handle.shutdown();
        }

        let tokens = self.tokens.clone();
        let config = self.config.clone();
        let url_thread = thread_id.to_string();
        let bus = self.bus.clone();
        let bus_open = bus.clone();
        let bus_close = bus.clone();
        let bus_terminal = bus.clone();
        let open_thread = thread_id.to_string();
        let close_thread = thread_id.to_string();

        let hooks = SocketHooks {
            url: Box::new(move || {
                tokens
                    .access_token()
                    .map(|token| config.chat_thread_url(&url_thread, &token))
            }),
            on_frame: Box::new(move |text, outbound| {
                handle_chat_frame(&bus, text, outbound);
            }),
            on_open: Box::new(move || {
                bus_open.emit(&Event::ChatConnected {
                    thread_id: open_thread.clone(),
                });
            }),
            on_close: Box::new(move |code, reason| {
                bus_close.emit(&Event::ChatDisconnected {
                    code,
                    reason: reason.to_string(),
                    thread_id: Some(close_thread.clone()),
                });
            }),
            on_terminal: Box::new(move |reason| {
                bus_terminal.emit(&Event::ChatError {
                    code: None,
                    message: reason.to_string(),
                });
            }),
        };

        sockets.chat = Some((
            thread_id.to_string(),
            SocketHandle::spawn(
                "chat",
                self.config.reconnect.clone(),
                self.config.heartbeat_interval,
                ChatClientCommand::Ping.frame(),
                hooks,
            ),
        ));
    }

    pub fn disconnect_notifications(&self) {
        let mut sockets = self.sockets.lock().expect("socket lock poisoned");
        if let Some(handle) = sockets.notifications.take() {
            handle.shutdown();
        }
    }

    pub fn disconnect_chat(&self) {
        let mut sockets = self.sockets.lock().expect("socket lock poisoned");
        if let Some((_, handle)) = sockets.chat.take() {
            handle.shutdown();
        }
    }

    /// Send a command on the chat socket. Dropped with a warning when the
    /// socket is not open; callers needing delivery must use REST.
    pub fn send_chat(&self, command: &ChatClientCommand) {
        let sockets = self.sockets.lock().expect("socket lock poisoned");
        match &sockets.chat {
            Some((_, handle)) if handle.state().is_open() => match serde_json::to_string(command)
            {
                Ok(payload) => handle.send_raw(payload),
                Err(err) => warn!("failed to serialize chat command: {err}"),
            },
            _ => warn!("chat socket not open, dropping command"),
        }
    }

    pub fn is_chat_open(&self) -> bool {
        let sockets = self.sockets.lock().expect("socket lock poisoned");
        sockets
            .chat
            .as_ref()
            .map(|(_, handle)| handle.state().is_open())
            .unwrap_or(false)
    }

    pub fn chat_thread_id(&self) -> Option<String> {
        let sockets = self.sockets.lock().expect("socket lock poisoned");
        sockets.chat.as_ref().map(|(id, _)| id.clone())
    }

    pub fn notification_state(&self) -> ConnectionState {
        let sockets = self.sockets.lock().expect("socket lock poisoned");
        sockets
            .notifications
            .as_ref()
            .map(|h| h.state())
            .unwrap_or(ConnectionState::Idle)
    }
}

fn handle_chat_frame(bus: &EventBus, text: &str, outbound: &OutboundSender) {
    let parsed = match parse_event::<ChatServerEvent>(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("unparseable chat frame: {err}");
            return;
        }
    };

    let event = match parsed {
        ParsedEvent::Known(event) => event,
        ParsedEvent::Other { kind, .. } => {
            debug!(kind, "ignoring unrecognized chat frame");
            return;
        }
    };

    match event {
        ChatServerEvent::ConnectionEstablished { rate_limits } => {
            bus.emit(&Event::ConnectionEstablished { rate_limits });
        }
        ChatServerEvent::MessageNew { message } => bus.emit(&Event::MessageNew { message }),
        ChatServerEvent::MessageUpdated { message } => {
            bus.emit(&Event::MessageUpdated { message });
        }
        ChatServerEvent::MessageDeleted {
            message_id,
            thread_id,
        } => bus.emit(&Event::MessageDeleted {
            message_id,
            thread_id,
        }),
        ChatServerEvent::TypingStart { user, user_id } => {
            let display_name = user
                .as_ref()
                .map(|u| u.display_name())
                .unwrap_or_else(|| "User".to_string());
            if let Some(user_id) = ChatServerEvent::typing_user_id(&user, &user_id) {
                bus.emit(&Event::TypingStart {
                    user_id,
                    display_name,
                });
            }
        }
        ChatServerEvent::TypingStop { user, user_id } => {
            if let Some(user_id) = ChatServerEvent::typing_user_id(&user, &user_id) {
                bus.emit(&Event::TypingStop { user_id });
            }
        }
        ChatServerEvent::ReceiptRead {
            message_id,
            user_id,
        } => bus.emit(&Event::ReceiptRead {
            message_id,
            user_id,
        }),
        ChatServerEvent::ReactionAdded {
            message_id,
            emoji,
            user_id,
            username,
            first_name,
            last_name,
            full_name,
        } => {
            let user = intrachat_shared::protocol::reaction_event_user(
                user_id, username, first_name, last_name, full_name,
            );
            bus.emit(&Event::ReactionAdded {
                message_id,
                emoji,
                user,
            });
        }
        ChatServerEvent::ReactionRemoved {
            message_id,
            emoji,
            user_id,
        } => bus.emit(&Event::ReactionRemoved {
            message_id,
            emoji,
            user_id,
        }),
        ChatServerEvent::MemberAdded { thread_id, .. } => {
            bus.emit(&Event::MemberAdded { thread_id });
        }
        ChatServerEvent::MemberRemoved { thread_id, .. } => {
            bus.emit(&Event::MemberRemoved { thread_id });
        }
        ChatServerEvent::ThreadUpdated { thread } => bus.emit(&Event::ThreadUpdated { thread }),
        ChatServerEvent::UnreadUpdate {
            thread_id,
            unread_count,
        } => bus.emit(&Event::UnreadUpdate {
            thread_id,
            unread_count,
        }),
        ChatServerEvent::Ping => {
            let _ = outbound.unbounded_send(ChatClientCommand::Pong.frame());
        }
        ChatServerEvent::Pong => {}
        ChatServerEvent::Error { code, message } => {
            // Heartbeat bookkeeping errors from the backend are noise.
            if message.to_lowercase().contains("ping") {
                debug!(?code, message, "chat heartbeat error");
            } else {
                bus.emit(&Event::ChatError { code, message });
            }
        }
    }
}

fn handle_notification_frame(bus: &EventBus, text: &str, outbound: &OutboundSender) {
    let parsed = match parse_event::<NotificationServerEvent>(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("unparseable notification frame: {err}");
            return;
        }
    };

    match parsed {
        ParsedEvent::Known(NotificationServerEvent::NotificationCount { count }) => {
            bus.emit(&Event::NotificationCount { count });
        }
        ParsedEvent::Known(NotificationServerEvent::UnreadUpdate {
            thread_id,
            unread_count,
        }) => bus.emit(&Event::UnreadUpdate {
            thread_id,
            unread_count,
        }),
        ParsedEvent::Known(NotificationServerEvent::UnreadCountsInitial { threads }) => {
            bus.emit(&Event::UnreadCountsInitial { threads });
        }
        ParsedEvent::Known(NotificationServerEvent::ConnectionSuccess {
            user_id,
            unread_count,
            ..
        }) => bus.emit(&Event::NotificationConnectionSuccess {
            user_id,
            unread_count,
        }),
        ParsedEvent::Known(NotificationServerEvent::Ping) => {
            let _ = outbound.unbounded_send(ChatClientCommand::Pong.frame());
        }
        ParsedEvent::Known(NotificationServerEvent::Pong) => {}
        // Unknown notification types are forwarded generically so the
        // embedding app can react to them.
        ParsedEvent::Other { kind, data } => {
            bus.emit(&Event::NotificationGeneric { kind, data });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collect(bus: &EventBus, name: &str) -> Arc<StdMutex<Vec<Event>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(name, move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    fn sender() -> (OutboundSender, futures_channel::mpsc::UnboundedReceiver<String>) {
        futures_channel::mpsc::unbounded()
    }

    #[test]
    fn chat_ping_gets_an_immediate_pong_reply() {
        let bus = EventBus::new();
        let (tx, mut rx) = sender();

        handle_chat_frame(&bus, r#"{"type":"ping"}"#, &tx);
        assert_eq!(
            rx.try_next().unwrap(),
            Some(ChatClientCommand::Pong.frame())
        );
    }

    #[test]
    fn ping_flavored_chat_errors_are_not_surfaced() {
        let bus = EventBus::new();
        let seen = collect(&bus, "chat.error");
        let (tx, _rx) = sender();

        handle_chat_frame(
            &bus,
            r#"{"type":"error","message":"Ping handling failed"}"#,
            &tx,
        );
        assert!(seen.lock().unwrap().is_empty());

        handle_chat_frame(
            &bus,
            r#"{"type":"error","code":"RATE_LIMIT_EXCEEDED","message":"slow down"}"#,
            &tx,
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn unread_update_is_emitted_from_either_channel() {
        let bus = EventBus::new();
        let seen = collect(&bus, "chat.unread.update");
        let (tx, _rx) = sender();

        handle_chat_frame(
            &bus,
            r#"{"type":"chat.unread.update","thread_id":"t1","unread_count":2}"#,
            &tx,
        );
        handle_notification_frame(
            &bus,
            r#"{"type":"chat.unread.count.update","thread_id":"t1","unread_count":3}"#,
            &tx,
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            Event::UnreadUpdate {
                thread_id: "t1".into(),
                unread_count: 3
            }
        );
    }

    #[test]
    fn unknown_notification_frames_forward_generically() {
        let bus = EventBus::new();
        let seen = collect(&bus, "notification.message");
        let (tx, _rx) = sender();

        handle_notification_frame(
            &bus,
            r#"{"type":"announcement.new","title":"maintenance"}"#,
            &tx,
        );

        let seen = seen.lock().unwrap();
        match &seen[0] {
            Event::NotificationGeneric { kind, data } => {
                assert_eq!(kind, "announcement.new");
                assert_eq!(data["title"], "maintenance");
            }
            other => panic!("expected generic forward, got {other:?}"),
        }
    }

    #[test]
    fn typing_start_resolves_user_from_either_shape() {
        let bus = EventBus::new();
        let seen = collect(&bus, "chat.typing.start");
        let (tx, _rx) = sender();

        handle_chat_frame(
            &bus,
            r#"{"type":"typing.start","user":{"id":7,"first_name":"Sami","last_name":"K"}}"#,
            &tx,
        );
        handle_chat_frame(&bus, r#"{"type":"typing.start","user_id":8}"#, &tx);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            Event::TypingStart {
                user_id: 7,
                display_name: "Sami K".into()
            }
        );
        assert_eq!(
            seen[1],
            Event::TypingStart {
                user_id: 8,
                display_name: "User".into()
            }
        );
    }
}
