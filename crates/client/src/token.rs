//! Access-token source for socket and REST authentication.

use std::sync::RwLock;

/// Supplies the current access token. Tokens rotate, so the provider is
/// re-queried on every connection attempt and REST call; `None` means no
/// token is currently available (commonly a refresh in flight).
pub trait TokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// In-memory token holder, updated by the surrounding auth layer.
#[derive(Default)]
pub struct MemoryTokenProvider {
    token: RwLock<Option<String>>,
}

impl MemoryTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().expect("token lock poisoned") = token;
    }
}

impl TokenProvider for MemoryTokenProvider {
    fn access_token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }
}
