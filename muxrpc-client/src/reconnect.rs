//! Redial backoff policies
//!
//! When a persistent connection is lost, the client redials the same
//! endpoint on the next send. By default a single dial attempt is made per
//! failure event, so a call issued while the endpoint is down fails fast
//! with a transport error. A backoff policy turns that single attempt into
//! a retry loop with configurable delays.
//!
//! # Built-in policies
//!
//! - **ExponentialBackoff**: exponentially increasing delays, optional
//!   jitter and attempt limit
//! - **FixedDelay**: constant delay between attempts
//!
//! The policy only governs dialing. Calls and subscriptions that were in
//! flight when the connection dropped are never resubmitted.

use std::time::Duration;

/// Policy consulted between failed dial attempts
///
/// The policy keeps state across the attempts of one failure event;
/// `reset()` is called after a successful dial so the next failure event
/// starts fresh.
pub trait RedialBackoff: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed)
    ///
    /// Returning `None` abandons the redial and surfaces the dial error
    /// to the waiting callers.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Reset accumulated state after a successful dial
    fn reset(&mut self);
}

/// Exponential backoff with optional jitter
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    /// Give up after this many attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add up to 25% random jitter to each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
            .with_max_attempts(10)
            .with_jitter()
    }
}

impl RedialBackoff for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let base_delay = self.min_delay.as_millis() as u64 * 2u64.pow(attempt.min(20));
        let delay = std::cmp::min(base_delay, self.max_delay.as_millis() as u64);

        let mut final_delay = Duration::from_millis(delay);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4).max(1));
            final_delay = Duration::from_millis(delay + jitter_ms);
        }

        Some(final_delay)
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Fixed delay between dial attempts
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl RedialBackoff for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        Some(self.delay)
    }

    fn reset(&mut self) {}
}
