//! Single-flight refresh with bounded retries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use super::types::{RefreshRequest, RefreshResponse};
use super::{SessionInner, SessionState};
use crate::config::RetryPolicy;
use crate::error::RefreshError;
use crate::events::{LogoutReason, RefreshFailure, SessionEvent};
use crate::storage::{SessionFlags, TokenKind};

/// In-flight flag and debounce clock of one context
pub(crate) struct RefreshGate {
    in_flight: AtomicBool,
    /// Signalled whenever a flight starts or ends
    flights: watch::Sender<bool>,
    last_success: Mutex<Option<Instant>>,
}

/// Holds the gate closed; reopens it when dropped, whichever way the refresh
/// ends (including cancellation of the refreshing task)
pub(crate) struct FlightGuard<'a> {
    gate: &'a RefreshGate,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::SeqCst);
        self.gate.flights.send_replace(false);
    }
}

impl RefreshGate {
    pub(crate) fn new() -> Self {
        let (flights, _) = watch::channel(false);
        Self {
            in_flight: AtomicBool::new(false),
            flights,
            last_success: Mutex::new(None),
        }
    }

    /// Claim the gate; `None` if a refresh is already running
    pub(crate) fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| {
                self.flights.send_replace(true);
                FlightGuard { gate: self }
            })
    }

    /// Wait until no refresh is in flight
    pub(crate) async fn settled(&self) {
        let mut flights = self.flights.subscribe();
        while self.is_refreshing() {
            if flights.changed().await.is_err() {
                break;
            }
        }
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the last successful refresh finished less than `window` ago
    pub(crate) fn debounced(&self, window: Duration) -> bool {
        let last = self.last_success.lock().unwrap_or_else(PoisonError::into_inner);
        last.map_or(false, |at| at.elapsed() < window)
    }

    fn record_success(&self) {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }
}

enum Failure {
    Rejected,
    Exhausted,
    /// The refresh token vanished between attempts
    TokenGone,
}

impl SessionInner {
    /// Run one refresh cycle.
    ///
    /// Returns `false` without a network call when offline, when another
    /// refresh is in flight, inside the debounce window, or when no refresh
    /// token is stored. Failures are never returned as errors; they are
    /// handled here and reported through the event bus.
    pub(crate) async fn refresh(self: &Arc<Self>, policy: RetryPolicy, mut attempt: u32) -> bool {
        if !self.is_online() {
            debug!("Offline, refresh suspended");
            return false;
        }
        // claimed before the first await, so racing callers see it set
        let Some(_flight) = self.gate.try_begin() else {
            debug!("Refresh already in flight");
            return false;
        };
        if self.gate.debounced(self.options.debounce_window) {
            debug!("Refreshed moments ago, skipping");
            return false;
        }

        let epoch = self.epoch();
        let previous = self.state();
        let first_attempt = attempt;
        self.set_state(SessionState::Refreshing);

        let failure = loop {
            let Some(refresh_token) = self.store.read(TokenKind::Refresh) else {
                if attempt == first_attempt {
                    debug!("No refresh token stored");
                    self.set_state(previous);
                    return false;
                }
                break Failure::TokenGone;
            };
            let flags = self.store.load_flags();
            let request = RefreshRequest {
                refresh_token,
                auto_login: flags.auto_login,
            };

            match self.client.refresh(&request).await {
                Ok(response) => {
                    return self.complete_refresh(epoch, response, request.refresh_token, &flags);
                }
                Err(RefreshError::Rejected) => {
                    warn!("Refresh token rejected by the server");
                    break Failure::Rejected;
                }
                Err(RefreshError::Transport(err)) if policy.can_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        "Refresh attempt {} failed: {}; retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    if self.epoch() != epoch {
                        debug!("Session ended during backoff, abandoning refresh");
                        return false;
                    }
                    attempt += 1;
                }
                Err(RefreshError::Transport(err)) => {
                    error!("Refresh failed after {} attempts: {}", attempt + 1, err);
                    break Failure::Exhausted;
                }
            }
        };

        self.fail_refresh(epoch, failure);
        false
    }

    fn complete_refresh(
        self: &Arc<Self>,
        epoch: u64,
        response: RefreshResponse,
        previous_refresh: String,
        flags: &SessionFlags,
    ) -> bool {
        if self.epoch() != epoch {
            info!("Session ended while refreshing, discarding the new token");
            return false;
        }

        // servers that do not rotate refresh tokens omit the field
        let refresh_token = response.refresh_token.unwrap_or(previous_refresh);
        if let Err(err) = self.store.save(
            &response.access_token,
            Some(&refresh_token),
            flags.durability(),
        ) {
            error!("Could not persist the refreshed token: {}", err);
            self.settle_after_failure();
            self.events.publish(SessionEvent::RefreshFailed {
                reason: RefreshFailure::Storage,
            });
            return false;
        }

        self.gate.record_success();
        self.set_state(SessionState::Authenticated);
        let expires_at = self.arm_after_refresh(&response.access_token);
        info!("Access token refreshed (expires at {:?})", expires_at);
        self.events
            .publish(SessionEvent::RefreshSucceeded { expires_at });
        true
    }

    fn fail_refresh(&self, epoch: u64, failure: Failure) {
        if self.epoch() != epoch {
            return;
        }
        if self.store.read(TokenKind::Refresh).is_none() {
            self.force_logout(LogoutReason::RefreshTokenMissing);
            return;
        }

        match failure {
            Failure::Rejected => {
                // authoritative, but the stored tokens are left for the UI to deal with
                self.timer.cancel();
                self.store.clear_flags();
                self.set_state(SessionState::Unauthenticated);
                self.events.publish(SessionEvent::RefreshFailed {
                    reason: RefreshFailure::Rejected,
                });
            }
            Failure::Exhausted | Failure::TokenGone => {
                self.settle_after_failure();
                self.events.publish(SessionEvent::RefreshFailed {
                    reason: RefreshFailure::Transport,
                });
            }
        }
    }

    /// Leave `Refreshing` for whatever the stored access token still supports
    fn settle_after_failure(&self) {
        let state = if self.validator.is_valid() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        self.set_state(state);
    }
}
