//! Idle watchdog: counts accept timeouts and says when the camera should be
//! put back into its safe defaults because no client has shown up.

#[derive(Debug)]
pub struct IdleWatchdog {
    threshold: u32,
    consecutive_timeouts: u32,
    fired: bool,
}

impl IdleWatchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_timeouts: 0,
            fired: false,
        }
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// A client connected; the idle streak is over.
    pub fn on_accept(&mut self) {
        self.consecutive_timeouts = 0;
        self.fired = false;
    }

    /// Returns `true` exactly once per idle streak, on the timeout that
    /// reaches the threshold.
    pub fn on_timeout(&mut self) -> bool {
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);
        if self.fired || self.consecutive_timeouts < self.threshold {
            return false;
        }
        self.fired = true;
        true
    }
}
