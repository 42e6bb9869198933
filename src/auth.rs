//! Surface of the authentication collaborator.
//!
//! The engine does not own authentication; it only needs to know whether
//! a session token is currently available. `SessionTokens` is the
//! in-memory holder the auth layer writes into, and `SessionLifecycle`
//! is the hook that starts and stops the sync service as sessions come
//! and go. A cycle already in flight when the token is revoked is
//! allowed to finish; no new cycle starts without a token.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::sync::SyncService;

/// Read side of the session: the sync service calls this before every
/// cycle and skips the cycle when no token is present.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// In-memory token holder, written by the auth layer on login/refresh
/// and cleared on logout.
#[derive(Default)]
pub struct SessionTokens {
    token: Mutex<Option<String>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
    }
}

impl AccessTokenProvider for SessionTokens {
    fn access_token(&self) -> Option<String> {
        self.token.lock().ok()?.clone()
    }
}

/// Session lifecycle hook: login stores the token and starts auto-sync,
/// logout clears it and stops auto-sync.
pub struct SessionLifecycle {
    tokens: Arc<SessionTokens>,
    sync: Arc<SyncService>,
    interval: Duration,
}

impl SessionLifecycle {
    pub fn new(tokens: Arc<SessionTokens>, sync: Arc<SyncService>, interval: Duration) -> Self {
        SessionLifecycle {
            tokens,
            sync,
            interval,
        }
    }

    pub fn on_login(&self, token: &str) {
        self.tokens.set_token(token);
        self.sync.clone().start_auto_sync(self.interval);
        info!("Session opened; auto-sync started");
    }

    pub fn on_logout(&self) {
        self.tokens.clear();
        self.sync.stop_auto_sync();
        info!("Session closed; auto-sync stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tokens_set_and_clear() {
        let tokens = SessionTokens::new();
        assert!(tokens.access_token().is_none());

        tokens.set_token("tok-1");
        assert_eq!(tokens.access_token().as_deref(), Some("tok-1"));

        tokens.set_token("tok-2");
        assert_eq!(tokens.access_token().as_deref(), Some("tok-2"));

        tokens.clear();
        assert!(tokens.access_token().is_none());
    }
}
