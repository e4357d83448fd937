//! Wall-clock sources

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as unix seconds
    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A wall clock that advances with tokio's clock.
///
/// Under `tokio::time::pause()` both timers and this clock move only when the
/// runtime advances, so expiry arithmetic and timer firing stay in step.
#[derive(Debug, Clone)]
pub struct InstantClock {
    epoch: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl InstantClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for InstantClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.origin.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.epoch + elapsed,
            Err(_) => self.epoch,
        }
    }
}
