//! Single-socket lifecycle: connect loop, heartbeat, reconnection.
//!
//! One background task owns the whole lifecycle of a socket. Inbound frames
//! are handed to a synchronous hook in wire-arrival order; outbound traffic
//! is queued through an unbounded channel. Intentional shutdown is signalled
//! through a watch channel so no reconnect can fire after teardown.

use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::policy::{classify_close, ConnectionState, ReconnectAction, RetryState};
use crate::config::ReconnectConfig;

pub(crate) type OutboundSender = UnboundedSender<String>;

/// Behavior hooks wired in by the socket manager.
pub(crate) struct SocketHooks {
    /// Builds the connection URL, re-querying the token provider. `None`
    /// means no token is available right now.
    pub url: Box<dyn Fn() -> Option<String> + Send + Sync>,
    /// Called synchronously for every inbound text frame. The sender can be
    /// used for immediate protocol replies (pong).
    pub on_frame: Box<dyn Fn(&str, &OutboundSender) + Send + Sync>,
    pub on_open: Box<dyn Fn() + Send + Sync>,
    pub on_close: Box<dyn Fn(Option<u16>, &str) + Send + Sync>,
    /// Raised once when retries are exhausted.
    pub on_terminal: Box<dyn Fn(&str) + Send + Sync>,
}

/// Handle to a running socket task. The task is detached; it exits on its
/// own once the shutdown signal fires.
pub(crate) struct SocketHandle {
    label: &'static str,
    outbound: OutboundSender,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

impl SocketHandle {
    pub fn spawn(
        label: &'static str,
        reconnect: ReconnectConfig,
        heartbeat: Duration,
        ping_frame: String,
        hooks: SocketHooks,
    ) -> Self {
        let (outbound, outbound_rx) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_socket(
            label,
            reconnect,
            heartbeat,
            ping_frame,
            hooks,
            outbound.clone(),
            outbound_rx,
            state_tx,
            shutdown_rx,
        ));

        Self {
            label,
            outbound,
            state: state_rx,
            shutdown: shutdown_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Queue a payload if the socket is open; otherwise log and drop.
    /// Callers must not assume delivery.
    pub fn send_raw(&self, payload: String) {
        if self.state().is_open() {
            let _ = self.outbound.unbounded_send(payload);
        } else {
            warn!(socket = self.label, "socket not open, dropping outbound payload");
        }
    }

    /// Intentional close: suppresses reconnection and stops the task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_socket(
    label: &'static str,
    reconnect: ReconnectConfig,
    heartbeat_period: Duration,
    ping_frame: String,
    hooks: SocketHooks,
    outbound: OutboundSender,
    mut outbound_rx: UnboundedReceiver<String>,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut retry = RetryState::default();
    let mut next_attempt: u32 = 0;

    'lifecycle: loop {
        if *shutdown.borrow() {
            let _ = state.send(ConnectionState::Idle);
            return;
        }

        // Tokens rotate: the provider is queried fresh on every attempt.
        let Some(url) = (hooks.url)() else {
            match retry.next_token_retry(&reconnect) {
                Some(delay) => {
                    warn!(socket = label, "no access token, retrying in {delay:?}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue 'lifecycle,
                        _ = shutdown.changed() => {
                            let _ = state.send(ConnectionState::Idle);
                            return;
                        }
                    }
                }
                None => {
                    let reason = "no access token available after max retries";
                    error!(socket = label, reason);
                    let _ = state.send(ConnectionState::Failed {
                        reason: reason.to_string(),
                    });
                    (hooks.on_terminal)(reason);
                    return;
                }
            }
        };

        let _ = state.send(if next_attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting {
                attempt: next_attempt,
            }
        });

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => {
                let _ = state.send(ConnectionState::Idle);
                return;
            }
        };

        let ws = match connected {
            Ok((ws, _response)) => ws,
            Err(err) => {
                error!(socket = label, "connect failed: {err}");
                match retry.on_close(super::policy::CloseClass::Generic, &reconnect) {
                    ReconnectAction::RetryAfter { attempt, delay } => {
                        next_attempt = attempt.max(1);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue 'lifecycle,
                            _ = shutdown.changed() => {
                                let _ = state.send(ConnectionState::Idle);
                                return;
                            }
                        }
                    }
                    _ => {
                        let reason = "max reconnect attempts exceeded";
                        let _ = state.send(ConnectionState::Failed {
                            reason: reason.to_string(),
                        });
                        (hooks.on_terminal)(reason);
                        return;
                    }
                }
            }
        };

        info!(socket = label, "connected");
        let _ = state.send(ConnectionState::Open);
        retry.on_open();
        (hooks.on_open)();

        let (mut write, mut read) = ws.split();
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat_period,
            heartbeat_period,
        );

        let mut close_info: Option<(Option<u16>, String)> = None;
        let mut intentional = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    intentional = true;
                    let _ = state.send(ConnectionState::Closing);
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        // Frames are handled synchronously, to completion,
                        // in wire-arrival order.
                        (hooks.on_frame)(text.as_str(), &outbound);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        close_info = Some(match frame {
                            Some(frame) => {
                                (Some(u16::from(frame.code)), frame.reason.to_string())
                            }
                            None => (None, String::new()),
                        });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(socket = label, "read error: {err}");
                        break;
                    }
                    None => break,
                },
                payload = outbound_rx.next() => {
                    if let Some(text) = payload {
                        if let Err(err) = write.send(Message::text(text)).await {
                            error!(socket = label, "send failed: {err}");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if write.send(Message::text(ping_frame.clone())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let (code, reason) = close_info.unwrap_or((None, String::new()));
        debug!(socket = label, ?code, reason, intentional, "socket closed");
        (hooks.on_close)(code, &reason);

        if intentional || *shutdown.borrow() {
            let _ = state.send(ConnectionState::Idle);
            return;
        }

        match retry.on_close(classify_close(code, &reason), &reconnect) {
            ReconnectAction::Stop => {
                let _ = state.send(ConnectionState::Idle);
                return;
            }
            ReconnectAction::RetryAfter { attempt, delay } => {
                next_attempt = attempt.max(1);
                info!(socket = label, "reconnecting in {delay:?}");
                let _ = state.send(ConnectionState::Reconnecting {
                    attempt: next_attempt,
                });
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        let _ = state.send(ConnectionState::Idle);
                        return;
                    }
                }
            }
            ReconnectAction::GiveUp => {
                let reason = "max reconnect attempts exceeded";
                error!(socket = label, reason);
                let _ = state.send(ConnectionState::Failed {
                    reason: reason.to_string(),
                });
                (hooks.on_terminal)(reason);
                return;
            }
        }
    }
}
