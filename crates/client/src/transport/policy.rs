//! Connection state and reconnect policy.
//!
//! Kept free of I/O so the retry rules are testable without sockets.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Lifecycle state of one socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not connected and not trying to be. Terminal unless reconnected
    /// explicitly.
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting { attempt: u32 },
    /// Retries exhausted; caller must explicitly retry.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Open or on its way there (no new connect needed).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open
                | ConnectionState::Connecting
                | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Classification of an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Normal closure; no reconnect.
    Clean,
    /// Auth-flavored closure: assume a token refresh is in flight and
    /// reconnect once after a fixed delay without consuming backoff budget.
    TokenRelated,
    /// Anything else: exponential backoff.
    Generic,
}

/// Classify a close by code and reason. `None` means the connection died
/// without a close frame (abnormal closure), which in practice is usually
/// the server killing an unauthenticated socket.
pub fn classify_close(code: Option<u16>, reason: &str) -> CloseClass {
    let reason = reason.to_lowercase();
    if reason.contains("token") || reason.contains("auth") {
        return CloseClass::TokenRelated;
    }
    match code {
        None => CloseClass::TokenRelated,
        Some(1006) | Some(3000) | Some(4001) | Some(4003) => CloseClass::TokenRelated,
        Some(1000) => CloseClass::Clean,
        Some(_) => CloseClass::Generic,
    }
}

/// What the connection loop should do after a close.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectAction {
    Stop,
    RetryAfter { attempt: u32, delay: Duration },
    GiveUp,
}

/// Retry bookkeeping for one socket. Both counters reset on a successful
/// open; intentional disconnects never reach this type.
#[derive(Debug, Default)]
pub struct RetryState {
    reconnect_attempts: u32,
    token_retries: u32,
}

impl RetryState {
    pub fn on_open(&mut self) {
        self.reconnect_attempts = 0;
        self.token_retries = 0;
    }

    /// Budgeted delay before retrying while no access token is available.
    /// `None` once the budget is exhausted; the counter resets so a later
    /// explicit connect starts fresh.
    pub fn next_token_retry(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        if self.token_retries < config.max_token_retries {
            self.token_retries += 1;
            Some(config.token_retry_delay)
        } else {
            self.token_retries = 0;
            None
        }
    }

    /// Decide the follow-up to an unexpected close of the given class.
    pub fn on_close(&mut self, class: CloseClass, config: &ReconnectConfig) -> ReconnectAction {
        match class {
            CloseClass::Clean => ReconnectAction::Stop,
            CloseClass::TokenRelated => {
                // Token refresh is presumed in flight; the backoff budget
                // is left untouched.
                self.reconnect_attempts = 0;
                ReconnectAction::RetryAfter {
                    attempt: 0,
                    delay: config.token_retry_delay,
                }
            }
            CloseClass::Generic => {
                if self.reconnect_attempts >= config.max_attempts {
                    return ReconnectAction::GiveUp;
                }
                self.reconnect_attempts += 1;
                ReconnectAction::RetryAfter {
                    attempt: self.reconnect_attempts,
                    delay: config.delay_for_attempt(self.reconnect_attempts),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_classification() {
        assert_eq!(classify_close(Some(1000), ""), CloseClass::Clean);
        assert_eq!(classify_close(Some(1011), ""), CloseClass::Generic);
        assert_eq!(classify_close(None, ""), CloseClass::TokenRelated);
        assert_eq!(classify_close(Some(4001), ""), CloseClass::TokenRelated);
        assert_eq!(classify_close(Some(4003), ""), CloseClass::TokenRelated);
        assert_eq!(classify_close(Some(3000), ""), CloseClass::TokenRelated);
        assert_eq!(
            classify_close(Some(1011), "Token expired"),
            CloseClass::TokenRelated
        );
        assert_eq!(
            classify_close(Some(1000), "authentication failed"),
            CloseClass::TokenRelated
        );
    }

    #[test]
    fn generic_closes_back_off_then_give_up() {
        let config = ReconnectConfig::default();
        let mut retry = RetryState::default();

        let mut delays = Vec::new();
        for _ in 0..config.max_attempts {
            match retry.on_close(CloseClass::Generic, &config) {
                ReconnectAction::RetryAfter { delay, .. } => delays.push(delay.as_millis()),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000]);

        assert_eq!(
            retry.on_close(CloseClass::Generic, &config),
            ReconnectAction::GiveUp
        );
    }

    #[test]
    fn token_closes_do_not_consume_backoff_budget() {
        let config = ReconnectConfig::default();
        let mut retry = RetryState::default();

        retry.on_close(CloseClass::Generic, &config);
        retry.on_close(CloseClass::Generic, &config);

        let action = retry.on_close(CloseClass::TokenRelated, &config);
        assert_eq!(
            action,
            ReconnectAction::RetryAfter {
                attempt: 0,
                delay: config.token_retry_delay
            }
        );

        // Backoff restarts from the first attempt afterwards.
        match retry.on_close(CloseClass::Generic, &config) {
            ReconnectAction::RetryAfter { attempt: 1, delay } => {
                assert_eq!(delay, config.initial_delay);
            }
            other => panic!("expected first-attempt backoff, got {other:?}"),
        }
    }

    #[test]
    fn successful_open_resets_counters() {
        let config = ReconnectConfig::default();
        let mut retry = RetryState::default();

        for _ in 0..config.max_attempts {
            retry.on_close(CloseClass::Generic, &config);
        }
        retry.on_open();

        match retry.on_close(CloseClass::Generic, &config) {
            ReconnectAction::RetryAfter { attempt: 1, .. } => {}
            other => panic!("expected reset backoff, got {other:?}"),
        }
    }

    #[test]
    fn token_retry_budget_is_bounded() {
        let config = ReconnectConfig::default();
        let mut retry = RetryState::default();

        for _ in 0..config.max_token_retries {
            assert_eq!(
                retry.next_token_retry(&config),
                Some(config.token_retry_delay)
            );
        }
        assert_eq!(retry.next_token_retry(&config), None);
        // Budget resets for a later explicit connect.
        assert!(retry.next_token_retry(&config).is_some());
    }

    #[test]
    fn clean_close_stops() {
        let config = ReconnectConfig::default();
        let mut retry = RetryState::default();
        assert_eq!(
            retry.on_close(CloseClass::Clean, &config),
            ReconnectAction::Stop
        );
    }
}
