//! Readiness poller - bounded retry for asynchronous external state
//!
//! Bridges the gap between "a service was told to start" and "the resource
//! it provides actually exists" (an interface acquiring its address, a
//! socket opening). Fixed sleep between polls, hard timeout, optional
//! overall run deadline. The clock is injectable so tests never sleep.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Time source abstraction. Production sleeps for real; tests advance a
/// fake clock instead.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Bounded retry-with-timeout primitive.
pub struct Poller {
    timeout: Duration,
    interval: Duration,
    deadline: Option<Instant>,
    clock: Box<dyn Clock>,
}

impl Poller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            deadline: None,
            clock: Box::new(SystemClock),
        }
    }

    /// Cap all waits by an overall run deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Poll `predicate` at the configured interval until it reports true.
    ///
    /// Returns `GatewayError::Timeout` once the timeout (or the run
    /// deadline, whichever is earlier) expires. The caller treats that as
    /// a recoverable condition and degrades.
    pub fn wait_until(&self, what: &str, mut predicate: impl FnMut() -> bool) -> Result<()> {
        let start = self.clock.now();
        let mut limit = start + self.timeout;
        if let Some(deadline) = self.deadline {
            if deadline < limit {
                limit = deadline;
            }
        }

        loop {
            if predicate() {
                debug!(what, "ready");
                return Ok(());
            }
            let now = self.clock.now();
            if now >= limit {
                let waited = now.duration_since(start).as_secs();
                warn!(what, waited_secs = waited, "readiness wait expired");
                return Err(GatewayError::Timeout {
                    what: what.to_string(),
                    waited_secs: waited,
                });
            }
            self.clock.sleep(self.interval);
        }
    }
}
