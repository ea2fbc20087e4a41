use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Suppresses store writes for a short window after the store was observed timing out.
///
/// Callers check [`CooldownGate::is_cooling_down`] before touching the store, call
/// [`CooldownGate::arm`] when a timeout is seen and [`CooldownGate::clear`] after any
/// successful call.
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_timeout: Mutex<Option<Instant>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_timeout: Mutex::new(None),
        }
    }

    pub fn arm(&self) {
        *self.last_timeout.lock() = Some(Instant::now());
    }

    pub fn clear(&self) {
        *self.last_timeout.lock() = None;
    }

    pub fn is_cooling_down(&self) -> bool {
        self.is_cooling_down_at(Instant::now())
    }

    fn is_cooling_down_at(&self, now: Instant) -> bool {
        match *self.last_timeout.lock() {
            Some(at) => now.saturating_duration_since(at) < self.window,
            None => false,
        }
    }
}
