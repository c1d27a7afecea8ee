//! Typed event dispatcher fed by both sockets.
//!
//! The transport layer normalizes raw wire frames into [`Event`] values and
//! emits them here; the synchronization core (and the embedding app)
//! subscribe by event name. Handlers run in registration order, and a
//! panicking handler is isolated so the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use intrachat_shared::{ChatUser, Message, RateLimits, Thread, ThreadUnread};
use tracing::error;

/// Normalized domain event fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Chat socket lifecycle
    ChatConnected {
        thread_id: String,
    },
    ChatDisconnected {
        code: Option<u16>,
        reason: String,
        thread_id: Option<String>,
    },
    ConnectionEstablished {
        rate_limits: Option<RateLimits>,
    },

    // Per-thread chat traffic
    MessageNew {
        message: Message,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        message_id: String,
        thread_id: Option<String>,
    },
    TypingStart {
        user_id: i64,
        display_name: String,
    },
    TypingStop {
        user_id: i64,
    },
    ReceiptRead {
        message_id: Option<String>,
        user_id: Option<i64>,
    },
    ReactionAdded {
        message_id: String,
        emoji: String,
        user: ChatUser,
    },
    ReactionRemoved {
        message_id: String,
        emoji: String,
        user_id: i64,
    },
    MemberAdded {
        thread_id: Option<String>,
    },
    MemberRemoved {
        thread_id: Option<String>,
    },
    ThreadUpdated {
        thread: Thread,
    },
    ChatError {
        code: Option<String>,
        message: String,
    },

    // Unread / badge traffic (either socket)
    UnreadUpdate {
        thread_id: String,
        unread_count: u32,
    },
    UnreadCountsInitial {
        threads: Vec<ThreadUnread>,
    },
    NotificationCount {
        count: u64,
    },
    NotificationConnectionSuccess {
        user_id: Option<i64>,
        unread_count: Option<u32>,
    },

    // Notification socket lifecycle
    NotificationConnected,
    NotificationDisconnected {
        code: Option<u16>,
        reason: String,
    },
    NotificationError {
        message: String,
    },
    /// Unrecognized notification frame, forwarded generically.
    NotificationGeneric {
        kind: String,
        data: serde_json::Value,
    },
}

impl Event {
    /// Dispatcher key for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ChatConnected { .. } => "chat.connected",
            Event::ChatDisconnected { .. } => "chat.disconnected",
            Event::ConnectionEstablished { .. } => "chat.connection.established",
            Event::MessageNew { .. } => "chat.message.new",
            Event::MessageUpdated { .. } => "chat.message.updated",
            Event::MessageDeleted { .. } => "chat.message.deleted",
            Event::TypingStart { .. } => "chat.typing.start",
            Event::TypingStop { .. } => "chat.typing.stop",
            Event::ReceiptRead { .. } => "chat.receipt.read",
            Event::ReactionAdded { .. } => "chat.reaction.added",
            Event::ReactionRemoved { .. } => "chat.reaction.removed",
            Event::MemberAdded { .. } => "chat.member.added",
            Event::MemberRemoved { .. } => "chat.member.removed",
            Event::ThreadUpdated { .. } => "chat.thread.updated",
            Event::ChatError { .. } => "chat.error",
            Event::UnreadUpdate { .. } => "chat.unread.update",
            Event::UnreadCountsInitial { .. } => "unread.counts.initial",
            Event::NotificationCount { .. } => "notification.count",
            Event::NotificationConnectionSuccess { .. } => "notification.connection.success",
            Event::NotificationConnected => "notification.connected",
            Event::NotificationDisconnected { .. } => "notification.disconnected",
            Event::NotificationError { .. } => "notification.error",
            Event::NotificationGeneric { .. } => "notification.message",
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque handle returned by [`EventBus::on`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Publish/subscribe registry keyed by event name.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<String, Vec<(ListenerId, Handler)>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`, invoked in registration order.
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a single handler.
    pub fn off(&self, event: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        if let Some(handlers) = listeners.get_mut(event) {
            handlers.retain(|(hid, _)| *hid != id);
            if handlers.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Remove all handlers for `event`, or every handler when `None`.
    pub fn remove_all(&self, event: Option<&str>) {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        match event {
            Some(event) => {
                listeners.remove(event);
            }
            None => listeners.clear(),
        }
    }

    /// Fan an event out to its subscribers. A panicking handler is caught
    /// and logged; remaining handlers still run.
    pub fn emit(&self, event: &Event) {
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.lock().expect("listener lock poisoned");
            match listeners.get(event.name()) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(event = event.name(), "event handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_event() -> Event {
        Event::NotificationCount { count: 1 }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = order.clone();
            bus.on("notification.count", move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        bus.emit(&count_event());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_handler_does_not_stop_later_handlers() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.on("notification.count", |_| panic!("boom"));
        let reached_clone = reached.clone();
        bus.on("notification.count", move |_| {
            *reached_clone.lock().unwrap() = true;
        });

        bus.emit(&count_event());
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn off_removes_only_the_given_listener() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0u32));

        let calls_a = calls.clone();
        let id_a = bus.on("notification.count", move |_| {
            *calls_a.lock().unwrap() += 1;
        });
        let calls_b = calls.clone();
        bus.on("notification.count", move |_| {
            *calls_b.lock().unwrap() += 10;
        });

        bus.off("notification.count", id_a);
        bus.emit(&count_event());
        assert_eq!(*calls.lock().unwrap(), 10);
    }

    #[test]
    fn remove_all_scopes_to_event_name() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0u32));

        let calls_a = calls.clone();
        bus.on("notification.count", move |_| {
            *calls_a.lock().unwrap() += 1;
        });
        let calls_b = calls.clone();
        bus.on("notification.connected", move |_| {
            *calls_b.lock().unwrap() += 10;
        });

        bus.remove_all(Some("notification.count"));
        bus.emit(&count_event());
        bus.emit(&Event::NotificationConnected);
        assert_eq!(*calls.lock().unwrap(), 10);

        bus.remove_all(None);
        bus.emit(&Event::NotificationConnected);
        assert_eq!(*calls.lock().unwrap(), 10);
    }

    #[test]
    fn handler_can_reregister_without_deadlock() {
        let bus = EventBus::new();
        let bus_clone = bus.clone();
        bus.on("notification.count", move |_| {
            bus_clone.on("notification.connected", |_| {});
        });
        bus.emit(&count_event());
    }
}
