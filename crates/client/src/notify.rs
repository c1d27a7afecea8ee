//! Notification side-effect seam.
//!
//! The sync core only decides *when* a user-facing notification should fire;
//! how it is presented (toast, desktop notification, sound) belongs to the
//! embedding application.

/// Payload handed to the notifier when a message arrives for a thread the
/// user is not actively viewing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatNotification {
    pub sender_name: String,
    pub thread_name: String,
    /// Message body, truncated to 100 characters.
    pub body: String,
    /// Thread to open when the notification is activated.
    pub thread_id: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: ChatNotification);
}

/// Default notifier that drops notifications.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: ChatNotification) {}
}

/// Truncate a message body for display in a notification.
pub fn truncate_body(content: &str, max_chars: usize) -> String {
    if content.chars().count() > max_chars {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_only_past_limit() {
        assert_eq!(truncate_body("short", 100), "short");
        let long = "x".repeat(150);
        let truncated = truncate_body(&long, 100);
        assert_eq!(truncated.chars().count(), 103);
        assert!(truncated.ends_with("..."));
    }
}
