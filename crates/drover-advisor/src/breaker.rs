use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

/// Fleet-wide breaker for the advisory service.
///
/// A rate-limit response trips it for `cooldown`; tripping again while open
/// restarts the cooldown. It closes by itself once the deadline passes. One
/// instance is shared by every call site.
#[derive(Debug)]
pub struct CircuitBreaker {
    open_until: RwLock<Option<Instant>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);

    pub fn new(cooldown: Duration) -> Self {
        Self {
            open_until: RwLock::new(None),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Open the breaker, re-arming the cooldown from now.
    pub fn trip(&self) {
        let deadline = Instant::now() + self.cooldown;
        let previous = self.open_until.write().replace(deadline);
        warn!(
            cooldown_secs = self.cooldown.as_secs(),
            rearmed = previous.is_some(),
            "advisory circuit breaker tripped"
        );
    }

    /// True while the cooldown is running. Clears expired state.
    pub fn is_open(&self) -> bool {
        let deadline = *self.open_until.read();
        match deadline {
            None => false,
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                let mut state = self.open_until.write();
                // Another trip may have landed between the two locks.
                if state.is_some_and(|until| Instant::now() >= until) {
                    *state = None;
                    info!("advisory circuit breaker closed after cooldown");
                }
                state.is_some()
            }
        }
    }

    /// Time until the breaker closes, if open.
    pub fn remaining(&self) -> Option<Duration> {
        let until = (*self.open_until.read())?;
        let now = Instant::now();
        (now < until).then(|| until - now)
    }

    pub fn state_name(&self) -> &'static str {
        if self.is_open() {
            "open"
        } else {
            "closed"
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COOLDOWN)
    }
}
