//! Client configuration and tunables.

use std::time::Duration;

/// Configuration for automatic reconnect behavior on unexpected closes.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of backoff reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Delay before reconnecting after a token-related close, and between
    /// retries when no access token is available yet.
    pub token_retry_delay: Duration,
    /// Maximum token-unavailable retries before raising a terminal error.
    pub max_token_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            token_retry_delay: Duration::from_secs(10),
            max_token_retries: 6,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for a 1-based attempt number:
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL for REST calls, e.g. `https://intranet.example.com`.
    pub api_base: String,
    /// Base URL for WebSocket connections, e.g. `wss://intranet.example.com`.
    pub ws_base: String,
    pub reconnect: ReconnectConfig,
    /// Heartbeat ping period while a socket is open.
    pub heartbeat_interval: Duration,
    /// How long a typing indicator survives without an explicit stop.
    pub typing_ttl: Duration,
    /// Freshness window during which a push-sourced unread count overrides
    /// a REST snapshot.
    pub unread_priority_window: Duration,
    /// Debounce before a full thread refresh triggered by a generic
    /// notification-count change.
    pub thread_refresh_debounce: Duration,
    /// Cooldown after a rate-limit rejection, in seconds.
    pub rate_limit_cooldown_secs: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".to_string(),
            ws_base: "ws://127.0.0.1:8000".to_string(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(5),
            unread_priority_window: Duration::from_millis(3000),
            thread_refresh_debounce: Duration::from_millis(500),
            rate_limit_cooldown_secs: 60,
        }
    }
}

impl ChatConfig {
    pub fn notifications_url(&self, token: &str) -> String {
        format!(
            "{}/ws/notifications/?token={}",
            self.ws_base.trim_end_matches('/'),
            urlencoding::encode(token)
        )
    }

    pub fn chat_thread_url(&self, thread_id: &str, token: &str) -> String {
        format!(
            "{}/ws/internal-chat/threads/{}/?token={}",
            self.ws_base.trim_end_matches('/'),
            thread_id,
            urlencoding::encode(token)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for_attempt(5), Duration::from_millis(16_000));
        assert_eq!(cfg.delay_for_attempt(6), Duration::from_millis(30_000));
        assert_eq!(cfg.delay_for_attempt(60), Duration::from_millis(30_000));
    }

    #[test]
    fn ws_urls_include_token_and_trimmed_base() {
        let cfg = ChatConfig {
            ws_base: "wss://example.com/".into(),
            ..ChatConfig::default()
        };
        assert_eq!(
            cfg.notifications_url("abc"),
            "wss://example.com/ws/notifications/?token=abc"
        );
        assert_eq!(
            cfg.chat_thread_url("t1", "abc"),
            "wss://example.com/ws/internal-chat/threads/t1/?token=abc"
        );
    }
}
