//! Startup restoration of a persisted session

use std::sync::Arc;

use log::{debug, info, warn};

use super::{SessionInner, SessionState};
use crate::events::SessionEvent;
use crate::storage::TokenKind;
use crate::token::TokenStatus;

impl SessionInner {
    pub(crate) async fn restore(self: &Arc<Self>) -> bool {
        let flags = self.store.load_flags();
        if !flags.wants_restore() {
            debug!("Auto-login not requested, skipping restore");
            return false;
        }

        match self.validator.check() {
            TokenStatus::Valid { token, .. } => {
                info!("Resuming stored session");
                self.set_state(SessionState::Authenticated);
                self.arm(&token);
                return true;
            }
            TokenStatus::Malformed => {
                // the store has been cleared, flags included
                self.restore_failed();
                return false;
            }
            TokenStatus::Missing | TokenStatus::Expired(_) => {}
        }

        if self.store.read(TokenKind::Refresh).is_none() {
            warn!("Stored session has no refresh token");
            self.restore_failed();
            return false;
        }
        if !self.is_online() {
            // the online transition revalidates and refreshes
            info!("Offline at startup, restore deferred");
            return false;
        }

        let epoch = self.epoch();
        if self.refresh(self.options.startup_retry, 0).await {
            info!("Session restored by refresh");
            return true;
        }
        // a refresh started elsewhere in this context may hold the gate
        self.gate.settled().await;
        if self.epoch() != epoch {
            // logged out or in again meanwhile; nothing left to restore
            return false;
        }
        if let TokenStatus::Valid { .. } = self.validator.check() {
            info!("Session restored by a concurrent refresh");
            self.set_state(SessionState::Authenticated);
            return true;
        }

        self.restore_failed();
        false
    }

    fn restore_failed(&self) {
        warn!("Auto-login failed");
        self.timer.cancel();
        self.store.clear_flags();
        self.set_state(SessionState::Unauthenticated);
        self.events.publish(SessionEvent::AutoLoginFailed);
    }
}
