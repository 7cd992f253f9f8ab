//! Per-platform rate limit state.

use std::time::{Duration, Instant};

/// Admission and backoff state for a single platform.
///
/// All mutation happens under the limiter's lock; the bucket itself is plain
/// data.
#[derive(Debug, Clone)]
pub struct PlatformBucket {
    /// Configured base delay between requests for this platform.
    pub base_delay: Duration,
    /// Current backoff multiplier, 1.0 when healthy.
    pub backoff_multiplier: f64,
    /// Earliest instant the next request may be admitted.
    pub next_slot: Option<Instant>,
    /// Platform paused until this instant after a block signal.
    pub cooldown_until: Option<Instant>,
    /// Start of the current request-budget window.
    pub window_start: Instant,
    /// Requests admitted in the current window.
    pub window_count: u32,
    /// Consecutive successes since the last throttle/block.
    pub consecutive_successes: u32,
    /// Whether currently in backoff.
    pub in_backoff: bool,
    /// Total requests admitted.
    pub total_requests: u64,
    /// Throttle signals received.
    pub throttle_hits: u64,
    /// Block signals received.
    pub block_hits: u64,
}

impl PlatformBucket {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            backoff_multiplier: 1.0,
            next_slot: None,
            cooldown_until: None,
            window_start: Instant::now(),
            window_count: 0,
            consecutive_successes: 0,
            in_backoff: false,
            total_requests: 0,
            throttle_hits: 0,
            block_hits: 0,
        }
    }

    /// The adaptive delay currently in force.
    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.backoff_multiplier)
    }

    /// Remaining cooldown after a block, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Reserve the next admission slot and return how long the caller must
    /// wait before issuing its request.
    ///
    /// Advancing `next_slot` inside the reservation is what makes admission
    /// FIFO: every later caller is spaced at least `current_delay` behind
    /// this one, regardless of how the callers interleave.
    pub fn reserve(
        &mut self,
        now: Instant,
        window: Duration,
        requests_per_window: u32,
    ) -> Duration {
        let mut admit = now;

        if let Some(slot) = self.next_slot {
            admit = admit.max(slot);
        }
        if let Some(until) = self.cooldown_until {
            admit = admit.max(until);
        }

        // Budget window: once the per-window allowance is spent, the next
        // admission waits for the window to roll over.
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.window_count = 0;
        }
        if requests_per_window > 0 && self.window_count >= requests_per_window {
            let rollover = self.window_start + window;
            admit = admit.max(rollover);
            self.window_start = rollover;
            self.window_count = 0;
        }

        self.window_count += 1;
        self.total_requests += 1;
        self.next_slot = Some(admit + self.current_delay());

        admit.saturating_duration_since(now)
    }
}
