//! Keeps this context in step with token changes made by other contexts

use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{SessionInner, SessionState};
use crate::events::LogoutReason;
use crate::storage::{StorageEvent, TokenKind, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::token::TokenStatus;

/// Listen for changes to the shared durable backend made by other contexts
pub(crate) fn spawn_listener(inner: &Arc<SessionInner>) -> JoinHandle<()> {
    let mut changes = inner.durable.subscribe();
    let context = inner.durable.context();
    let weak: Weak<SessionInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        loop {
            let received = changes.recv().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match received {
                Ok(event) if event.origin == context => {}
                Ok(event) => inner.on_peer_change(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} storage changes, resynchronising", skipped);
                    inner.resync();
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Storage listener for context {} stopped", context);
    })
}

impl SessionInner {
    pub(crate) fn on_peer_change(self: &Arc<Self>, event: &StorageEvent) {
        match (event.key.as_str(), event.new_value.as_deref()) {
            (ACCESS_TOKEN_KEY, Some(token)) => {
                debug!("Access token updated by another context");
                self.adopt_peer_token(token);
            }
            (ACCESS_TOKEN_KEY, None) => {
                debug!("Access token removed by another context");
                self.timer.cancel();
                self.store.clear_access();
                self.set_state(SessionState::Unauthenticated);
            }
            (REFRESH_TOKEN_KEY, None) => {
                info!("Signed out in another context");
                self.force_logout(LogoutReason::SignedOutElsewhere);
            }
            _ => {}
        }
    }

    /// Follow a token written by a peer instead of scheduling our own
    /// refresh against the old one
    fn adopt_peer_token(self: &Arc<Self>, token: &str) {
        // the writer refreshed just now; an in-window token is not ours to refresh immediately
        self.arm_after_refresh(token);
        if self.state() == SessionState::Unauthenticated {
            self.set_state(SessionState::Authenticated);
        }
    }

    /// Rebuild local state from storage after missing notifications
    fn resync(self: &Arc<Self>) {
        match self.validator.check() {
            TokenStatus::Valid { token, .. } => self.adopt_peer_token(&token),
            TokenStatus::Malformed => {
                self.timer.cancel();
                self.set_state(SessionState::Unauthenticated);
            }
            TokenStatus::Missing | TokenStatus::Expired(_) => {
                self.timer.cancel();
                if self.store.read(TokenKind::Refresh).is_some() {
                    self.fire_now();
                } else {
                    self.set_state(SessionState::Unauthenticated);
                }
            }
        }
    }
}
