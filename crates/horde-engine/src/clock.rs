use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{HordeError, Operation};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Time source for the poll loop: elapsed time and the inter-poll wait.
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Blocks for `duration`, returning [`HordeError::Cancelled`] as soon as
    /// `cancel` is observed.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), HordeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), HordeError> {
        let deadline = Instant::now() + duration;
        loop {
            cancel.check(Operation::Wait)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
