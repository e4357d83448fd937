//! Session notifications for the UI layer
//!
//! Notifications are fire-and-forget: the session manager never waits for a
//! subscriber and never learns what it did with an event.

use log::{trace, warn};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 32;

/// Why a refresh gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailure {
    /// The server rejected the refresh token (401)
    Rejected,
    /// Retries exhausted on network or server errors
    Transport,
    /// The new token could not be persisted anywhere
    Storage,
}

/// Why the session was ended without the user asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// No refresh token was left to recover the session with
    RefreshTokenMissing,
    /// Another context removed the token
    SignedOutElsewhere,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    RefreshSucceeded { expires_at: Option<i64> },
    /// Recoverable: local tokens are kept so the UI can prompt re-authentication
    RefreshFailed { reason: RefreshFailure },
    AutoLoginFailed,
    /// The UI should redirect to the login screen
    ForcedLogout { reason: LogoutReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RefreshSucceeded,
    RefreshFailed,
    AutoLoginFailed,
    ForcedLogout,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RefreshSucceeded { .. } => EventKind::RefreshSucceeded,
            Self::RefreshFailed { .. } => EventKind::RefreshFailed,
            Self::AutoLoginFailed => EventKind::AutoLoginFailed,
            Self::ForcedLogout { .. } => EventKind::ForcedLogout,
        }
    }
}

/// Publish/subscribe hub for [`SessionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        trace!("Publishing {:?}", event);
        // Ignore send error if no receivers are listening
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Run `handler` for every event of `kind` until the bus is dropped or the
    /// returned task is aborted
    pub fn on<F>(&self, kind: EventKind, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.kind() == kind => handler(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Handler for {:?} missed {} events", kind, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
