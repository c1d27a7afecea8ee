//! Ephemeral typing indicators.
//!
//! Each entry carries an expiry task so a lost `typing.stop` cannot leave a
//! stale indicator behind: without an explicit stop the entry self-clears
//! after the configured TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

struct TypingEntry {
    display_name: String,
    expiry: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TypingTracker {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<i64, TypingEntry>>>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a typing start, replacing any existing timer for the user.
    pub fn start(&self, user_id: i64, display_name: String) {
        let entries = self.entries.clone();
        let ttl = self.ttl;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            entries.lock().expect("typing lock poisoned").remove(&user_id);
        });

        let mut entries = self.entries.lock().expect("typing lock poisoned");
        if let Some(old) = entries.insert(
            user_id,
            TypingEntry {
                display_name,
                expiry,
            },
        ) {
            old.expiry.abort();
        }
    }

    /// Explicit stop: cancel the timer and remove the entry immediately.
    pub fn stop(&self, user_id: i64) {
        if let Some(entry) = self
            .entries
            .lock()
            .expect("typing lock poisoned")
            .remove(&user_id)
        {
            entry.expiry.abort();
        }
    }

    /// Drop all indicators and their timers.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().expect("typing lock poisoned");
        for (_, entry) in entries.drain() {
            entry.expiry.abort();
        }
    }

    pub fn is_typing(&self, user_id: i64) -> bool {
        self.entries
            .lock()
            .expect("typing lock poisoned")
            .contains_key(&user_id)
    }

    /// Snapshot of (user id, display name) pairs currently typing.
    pub fn snapshot(&self) -> Vec<(i64, String)> {
        self.entries
            .lock()
            .expect("typing lock poisoned")
            .iter()
            .map(|(id, entry)| (*id, entry.display_name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn indicator_expires_after_ttl_and_not_before() {
        let tracker = TypingTracker::new(TTL);
        tracker.start(7, "Sami".into());

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(tracker.is_typing(7));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!tracker.is_typing(7));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_timer() {
        let tracker = TypingTracker::new(TTL);
        tracker.start(7, "Sami".into());

        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.start(7, "Sami".into());

        // Old timer would have fired at t=5s; the replacement keeps the
        // entry alive until t=8s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(tracker.is_typing(7));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!tracker.is_typing(7));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_removes_immediately() {
        let tracker = TypingTracker::new(TTL);
        tracker.start(7, "Sami".into());
        tracker.start(8, "Nadia".into());

        tracker.stop(7);
        assert!(!tracker.is_typing(7));
        assert!(tracker.is_typing(8));

        tracker.clear();
        assert!(tracker.snapshot().is_empty());
    }
}
