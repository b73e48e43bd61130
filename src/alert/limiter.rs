use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(10);

/// True iff strictly more than `cooldown` has passed since `last`.
/// A limiter that has never fired always allows.
pub fn should_alert(now: Instant, last: Option<Instant>, cooldown: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) > cooldown,
    }
}

/// Per-session alert cooldown.
///
/// `try_acquire` decides and records in one critical section, so two
/// concurrent detections can never both pass.
#[derive(Debug)]
pub struct AlertLimiter {
    cooldown: Duration,
    last_alert: Mutex<Option<Instant>>,
}

impl AlertLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: Mutex::new(None),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut last = self
            .last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if should_alert(now, *last, self.cooldown) {
            *last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn last_alert(&self) -> Option<Instant> {
        *self
            .last_alert
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AlertLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN)
    }
}
