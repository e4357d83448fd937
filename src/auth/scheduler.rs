//! Proactive refresh scheduling

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::SessionInner;
use crate::token;

/// Why a refresh has to happen right away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// The token is already past its expiry
    Expired,
    /// The token is still valid but inside the refresh offset window
    InsideWindow,
}

/// When to refresh a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshPlan {
    Immediate(Urgency),
    Scheduled {
        delay: Duration,
        /// Unix seconds
        refresh_at: i64,
    },
}

impl RefreshPlan {
    /// Plan a refresh `offset` ahead of `expiry`, as seen at `now` (unix
    /// seconds). A scheduled delay is always at least one second.
    pub fn compute(expiry: i64, now: i64, offset: Duration) -> Self {
        if now >= expiry {
            return RefreshPlan::Immediate(Urgency::Expired);
        }
        let offset = i64::try_from(offset.as_secs()).unwrap_or(i64::MAX);
        let refresh_at = expiry.saturating_sub(offset);
        if now >= refresh_at {
            return RefreshPlan::Immediate(Urgency::InsideWindow);
        }
        RefreshPlan::Scheduled {
            delay: Duration::from_secs(refresh_at.abs_diff(now)),
            refresh_at,
        }
    }

    /// Plan for a token that was just issued but already falls inside its
    /// window. Firing immediately would only hit the debounce gate, so the
    /// refresh goes halfway to expiry, no sooner than `floor`.
    fn after_refresh(expiry: i64, now: i64, floor: Duration) -> Self {
        let half = Duration::from_secs(expiry.saturating_sub(now).max(0).unsigned_abs() / 2);
        let delay = half.max(floor);
        let delay_secs = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);
        RefreshPlan::Scheduled {
            delay,
            refresh_at: now.saturating_add(delay_secs),
        }
    }
}

struct ArmedTimer {
    generation: u64,
    fires_at: i64,
    handle: JoinHandle<()>,
}

/// Holds the single live refresh timer of a context
pub(crate) struct TimerSlot {
    armed: Mutex<Option<ArmedTimer>>,
    generation: AtomicU64,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        Self {
            armed: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the current timer with the task built by `spawn`.
    ///
    /// `spawn` runs under the slot lock and receives the generation the task
    /// must pass to [`release`](Self::release) when it fires.
    pub(crate) fn arm<F>(&self, fires_at: i64, spawn: F)
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = spawn(generation);
        *armed = Some(ArmedTimer {
            generation,
            fires_at,
            handle,
        });
    }

    /// Called by a firing timer: detach it from the slot without aborting it.
    /// `false` if the slot has since been re-armed or cancelled.
    pub(crate) fn release(&self, generation: u64) -> bool {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        match armed.as_ref() {
            Some(timer) if timer.generation == generation => {
                armed.take();
                true
            }
            _ => false,
        }
    }

    /// Abort the live timer; `true` if there was one
    pub(crate) fn cancel(&self) -> bool {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        match armed.take() {
            Some(timer) => {
                debug!("Cancelling refresh timer due at {}", timer.fires_at);
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn fires_at(&self) -> Option<i64> {
        let armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        armed.as_ref().map(|timer| timer.fires_at)
    }
}

impl SessionInner {
    fn refresh_offset(&self) -> Duration {
        if self.store.load_flags().persistent_login {
            self.options.persistent_refresh_offset
        } else {
            self.options.ephemeral_refresh_offset
        }
    }

    /// Arm the refresh timer for `access_token`, cancelling any armed one
    pub(crate) fn arm(self: &Arc<Self>, access_token: &str) -> Option<RefreshPlan> {
        self.schedule(access_token, false)
    }

    /// Re-arm after a successful refresh; returns the new token's expiry
    pub(crate) fn arm_after_refresh(self: &Arc<Self>, access_token: &str) -> Option<i64> {
        self.schedule(access_token, true);
        token::decode(access_token).and_then(|claims| self.validator.expiry_of(&claims))
    }

    fn schedule(self: &Arc<Self>, access_token: &str, after_refresh: bool) -> Option<RefreshPlan> {
        self.timer.cancel();

        if !self.is_online() {
            debug!("Offline, not arming the refresh timer");
            return None;
        }
        let Some(claims) = token::decode(access_token) else {
            warn!("Cannot schedule a refresh for an undecodable token");
            return None;
        };
        let Some(expiry) = self.validator.expiry_of(&claims) else {
            warn!("Token carries no usable expiry, refresh not scheduled");
            return None;
        };

        let now = self.clock.unix_now();
        let mut plan = RefreshPlan::compute(expiry, now, self.refresh_offset());
        // an immediate fire inside the debounce window would be swallowed
        let debounced = self.gate.debounced(self.options.debounce_window);
        if (after_refresh || debounced) && matches!(plan, RefreshPlan::Immediate(_)) {
            plan = RefreshPlan::after_refresh(expiry, now, self.options.debounce_window);
        }

        match plan {
            RefreshPlan::Immediate(urgency) => {
                debug!("Token needs refreshing now ({:?})", urgency);
                self.start_timer(Duration::ZERO, now);
            }
            RefreshPlan::Scheduled { delay, refresh_at } => {
                debug!("Refresh scheduled at {} (in {:?})", refresh_at, delay);
                self.start_timer(delay, refresh_at);
            }
        }
        Some(plan)
    }

    /// Refresh as soon as possible through the timer slot
    pub(crate) fn fire_now(self: &Arc<Self>) {
        let now = self.clock.unix_now();
        self.start_timer(Duration::ZERO, now);
    }

    fn start_timer(self: &Arc<Self>, delay: Duration, fires_at: i64) {
        let weak = Arc::downgrade(self);
        self.timer.arm(fires_at, move |generation| {
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.timer.release(generation) {
                    return;
                }
                debug!("Refresh timer fired");
                inner.refresh(inner.options.retry, 0).await;
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn test_expired_token_refreshes_immediately() {
        assert_eq!(
            RefreshPlan::compute(1_000, 1_000, 30 * MIN),
            RefreshPlan::Immediate(Urgency::Expired)
        );
        assert_eq!(
            RefreshPlan::compute(1_000, 5_000, 30 * MIN),
            RefreshPlan::Immediate(Urgency::Expired)
        );
    }

    #[test]
    fn test_inside_offset_window_refreshes_immediately() {
        // exp = now + 600s, ephemeral offset 900s
        assert_eq!(
            RefreshPlan::compute(10_600, 10_000, 15 * MIN),
            RefreshPlan::Immediate(Urgency::InsideWindow)
        );
        assert_eq!(
            RefreshPlan::compute(10_900, 10_000, 15 * MIN),
            RefreshPlan::Immediate(Urgency::InsideWindow)
        );
    }

    #[test]
    fn test_scheduled_before_expiry() {
        assert_eq!(
            RefreshPlan::compute(10_000 + 3_600, 10_000, 30 * MIN),
            RefreshPlan::Scheduled {
                delay: Duration::from_secs(1_800),
                refresh_at: 11_800,
            }
        );
    }

    #[test]
    fn test_delay_is_never_negative() {
        for now in (0..4_000).step_by(7) {
            match RefreshPlan::compute(3_600, now, 15 * MIN) {
                RefreshPlan::Scheduled { delay, refresh_at } => {
                    assert!(delay >= Duration::from_secs(1));
                    assert_eq!(refresh_at, 2_700);
                    assert!(now < refresh_at);
                }
                RefreshPlan::Immediate(_) => assert!(now >= 2_700),
            }
        }
    }

    #[test]
    fn test_huge_offset_does_not_overflow() {
        assert_eq!(
            RefreshPlan::compute(100, 50, Duration::from_secs(u64::MAX)),
            RefreshPlan::Immediate(Urgency::InsideWindow)
        );
    }

    #[test]
    fn test_after_refresh_plan_waits() {
        assert_eq!(
            RefreshPlan::after_refresh(1_600, 1_000, Duration::from_secs(5)),
            RefreshPlan::Scheduled {
                delay: Duration::from_secs(300),
                refresh_at: 1_300,
            }
        );
        assert_eq!(
            RefreshPlan::after_refresh(900, 1_000, Duration::from_secs(5)),
            RefreshPlan::Scheduled {
                delay: Duration::from_secs(5),
                refresh_at: 1_005,
            }
        );
    }

    #[tokio::test]
    async fn test_slot_keeps_one_timer() {
        let slot = TimerSlot::new();
        slot.arm(100, |_| tokio::spawn(std::future::pending()));
        slot.arm(200, |_| tokio::spawn(std::future::pending()));
        assert_eq!(slot.fires_at(), Some(200));

        assert!(slot.cancel());
        assert!(!slot.cancel());
        assert_eq!(slot.fires_at(), None);
    }

    #[tokio::test]
    async fn test_release_ignores_stale_generation() {
        let slot = TimerSlot::new();
        let mut first = 0;
        slot.arm(100, |generation| {
            first = generation;
            tokio::spawn(async {})
        });
        slot.arm(200, |_| tokio::spawn(async {}));

        assert!(!slot.release(first));
        assert_eq!(slot.fires_at(), Some(200));
    }

    #[tokio::test]
    async fn test_rearm_aborts_previous_task() {
        let slot = TimerSlot::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        slot.arm(100, move |_| {
            tokio::spawn(async move {
                let _tx = tx;
                std::future::pending::<()>().await;
            })
        });
        slot.arm(200, |_| tokio::spawn(async {}));

        // the aborted task drops its sender
        assert!(rx.await.is_err());
    }
}
