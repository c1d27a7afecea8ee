//! Headless synchronization client for the intrachat backend.
//!
//! The library keeps a local [`state::ChatState`] in sync with the server
//! over two WebSocket channels plus REST, and exposes the changes through a
//! typed [`events::EventBus`]. Rendering, persistence and desktop
//! notifications are left to the embedding application.

pub mod api;
pub mod client;
pub mod config;
pub mod events;
pub mod logging;
pub mod notify;
pub mod state;
pub mod token;
pub mod transport;
pub mod typing;
pub mod unread;

pub use client::ChatClient;
pub use config::{ChatConfig, ReconnectConfig};
pub use events::{Event, EventBus, ListenerId};
pub use notify::{ChatNotification, NoopNotifier, Notifier};
pub use state::{ArrivalEffect, ChatState};
pub use token::{MemoryTokenProvider, TokenProvider};
pub use transport::ConnectionState;
pub use typing::TypingTracker;
pub use unread::UnreadReconciler;
