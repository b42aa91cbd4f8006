//! OTG poll timer
//!
//! The timer is only a deadline owned by the controller. Whoever drives it
//! (the service task, or a test) calls `Controller::poll_timer_fired`, which
//! consults the timer under the controller lock, so a fire that races with a
//! disarm is a no-op.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

pub struct PollTimer {
    deadline: Option<Instant>,
    /// Wakes the driving task whenever the deadline changes
    wake: Arc<Notify>,
}

impl PollTimer {
    pub fn new() -> Self {
        Self {
            deadline: None,
            wake: Arc::new(Notify::new()),
        }
    }

    /// (Re)arm to fire `delay` after `now`, replacing any pending deadline
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
        self.wake.notify_one();
    }

    pub fn disarm(&mut self) {
        if self.deadline.take().is_some() {
            self.wake.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the deadline if it has passed
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }
}

impl Default for PollTimer {
    fn default() -> Self {
        Self::new()
    }
}
