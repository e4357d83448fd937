//! Connectivity and visibility handling

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{SessionInner, SessionState};
use crate::storage::TokenKind;
use crate::token::TokenStatus;

impl SessionInner {
    pub(crate) fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }

        if online {
            info!("Back online, revalidating session");
            self.revalidate();
        } else {
            info!("Gone offline, suspending refresh");
            self.timer.cancel();
        }
    }

    /// Check the stored token once and refresh or re-arm as needed. Every
    /// refresh goes through the timer slot and the single-flight gate.
    pub(crate) fn revalidate(self: &Arc<Self>) {
        match self.validator.check() {
            TokenStatus::Valid { token, .. } => {
                // inside the offset window this fires right away
                self.arm(&token);
            }
            TokenStatus::Missing | TokenStatus::Expired(_) => {
                if self.store.read(TokenKind::Refresh).is_some() {
                    debug!("No usable access token, refreshing");
                    self.fire_now();
                } else {
                    self.timer.cancel();
                    self.set_state(SessionState::Unauthenticated);
                }
            }
            TokenStatus::Malformed => {
                self.timer.cancel();
                self.set_state(SessionState::Unauthenticated);
            }
        }
    }
}

/// Feed connectivity changes from `status` into the session
pub(crate) fn spawn_watcher(
    inner: &Arc<SessionInner>,
    mut status: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let weak: Weak<SessionInner> = Arc::downgrade(inner);
    let initial = *status.borrow_and_update();
    inner.set_online(initial);

    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let online = *status.borrow_and_update();
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.set_online(online);
        }
        debug!("Network watcher stopped");
    })
}
