//! Request spacing and retry-with-backoff.

use crate::error::{FetchError, FetchResult};
use std::cmp::min;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Keeps consecutive calls to one service at least `interval` apart.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Blocks until `interval` has passed since the previous call, then
    /// marks now as the last call.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                let remaining = self.interval - elapsed;
                debug!("rate limit: sleeping {:?}", remaining);
                thread::sleep(remaining);
            }
        }
        self.last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is used up. Returns the last result and the number of
    /// attempts made.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> (FetchResult<T>, u32)
    where
        F: FnMut() -> FetchResult<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return (Ok(v), attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    thread::sleep(delay);
                    delay = min(delay * 2, MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    pub fn call<T, F>(&self, what: &str, op: F) -> FetchResult<T>
    where
        F: FnMut() -> FetchResult<T>,
    {
        self.run(what, op).0
    }
}
