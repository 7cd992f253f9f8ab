//! Adaptive per-platform rate limiter.
//!
//! Tracks admission timing per platform and adapts delays based on reported
//! outcomes. Backs off on throttling, pauses the platform on blocking, and
//! gradually recovers on success.
//!
//! Admission is a single serialized decision point: every acquirer reserves
//! its slot under one lock, so two concurrent tasks for the same platform can
//! never both proceed within less than the current minimum delay.

mod bucket;
mod persistence;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use bucket::PlatformBucket;
pub use persistence::{load_rate_limit_state, save_rate_limit_state};

/// Limiter tuning knobs.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Base inter-request delay per platform.
    pub base_delay: Duration,
    /// Floor the delay can recover down to.
    pub min_delay: Duration,
    /// Ceiling the adaptive delay can grow to.
    pub max_delay: Duration,
    /// Multiplier applied on a throttle signal.
    pub backoff_multiplier: f64,
    /// Multiplier cap; keeps backoff finite.
    pub max_backoff_multiplier: f64,
    /// Multiplier applied on recovery steps, below 1.0.
    pub recovery_multiplier: f64,
    /// Consecutive successes required before a recovery step.
    pub recovery_threshold: u32,
    /// Pause window after a block signal.
    pub block_cooldown: Duration,
    /// Request-budget window length.
    pub window: Duration,
    /// Requests allowed per window; 0 disables the budget.
    pub requests_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1500),
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.5,
            max_backoff_multiplier: 32.0,
            recovery_multiplier: 0.75,
            recovery_threshold: 3,
            block_cooldown: Duration::from_secs(300),
            window: Duration::from_secs(60),
            requests_per_window: 0,
        }
    }
}

/// Per-platform override from configuration, expressed as a request budget.
#[derive(Debug, Clone, Copy)]
pub struct RateOverride {
    pub requests_per_window: u32,
    pub window: Duration,
}

/// Outcome of a gated request, reported back by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Throttled,
    Blocked,
}

/// Result of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The caller may proceed immediately.
    Ready,
    /// The caller owns the reserved slot but must wait this long first.
    Wait(Duration),
}

impl Admission {
    pub fn wait_duration(&self) -> Duration {
        match self {
            Self::Ready => Duration::ZERO,
            Self::Wait(d) => *d,
        }
    }
}

/// Snapshot of one platform's limiter state.
#[derive(Debug, Clone)]
pub struct PlatformRateStats {
    pub current_delay: Duration,
    pub backoff_multiplier: f64,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub throttle_hits: u64,
    pub block_hits: u64,
}

/// Adaptive rate limiter shared by all concurrent platform tasks.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    overrides: HashMap<String, RateOverride>,
    buckets: Mutex<HashMap<String, PlatformBucket>>,
}

impl RateLimiter {
    /// Create a limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Install per-platform request-budget overrides.
    pub fn with_overrides(mut self, overrides: HashMap<String, RateOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    fn budget_for(&self, platform: &str) -> (Duration, u32) {
        match self.overrides.get(platform) {
            Some(o) => (o.window, o.requests_per_window),
            None => (self.config.window, self.config.requests_per_window),
        }
    }

    /// Reserve the next admission slot for a platform.
    ///
    /// The returned wait already accounts for backoff, cooldown and request
    /// budget. Callers sleep out the wait themselves so that other platform
    /// tasks are never blocked by this one's pacing.
    pub async fn acquire(&self, platform: &str) -> Admission {
        let (window, budget) = self.budget_for(platform);
        let wait = {
            let mut buckets = self.buckets.lock().await;
            let bucket = buckets
                .entry(platform.to_string())
                .or_insert_with(|| PlatformBucket::new(self.config.base_delay));
            bucket.reserve(Instant::now(), window, budget)
        };

        if wait.is_zero() {
            Admission::Ready
        } else {
            debug!("rate limiting {}: waiting {:?}", platform, wait);
            Admission::Wait(wait)
        }
    }

    /// Reserve a slot and sleep out the wait.
    pub async fn admit(&self, platform: &str) {
        if let Admission::Wait(wait) = self.acquire(platform).await {
            tokio::time::sleep(wait).await;
        }
    }

    /// Report the outcome of an admitted request.
    ///
    /// Returns the remaining pause window when the platform was just put
    /// into cooldown, so the orchestrator can treat it as a platform-level
    /// pause signal.
    pub async fn report_outcome(&self, platform: &str, outcome: Outcome) -> Option<Duration> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(platform.to_string())
            .or_insert_with(|| PlatformBucket::new(self.config.base_delay));

        match outcome {
            Outcome::Success => {
                bucket.consecutive_successes += 1;
                if bucket.in_backoff && bucket.consecutive_successes >= self.config.recovery_threshold
                {
                    bucket.backoff_multiplier =
                        (bucket.backoff_multiplier * self.config.recovery_multiplier).max(1.0);
                    bucket.consecutive_successes = 0;
                    if bucket.backoff_multiplier <= 1.0 {
                        bucket.in_backoff = false;
                        info!("platform {} recovered from backoff", platform);
                    } else {
                        debug!(
                            "platform {} backoff reduced to x{:.2}",
                            platform, bucket.backoff_multiplier
                        );
                    }
                }
                None
            }
            Outcome::Throttled => {
                bucket.throttle_hits += 1;
                bucket.consecutive_successes = 0;
                bucket.in_backoff = true;
                bucket.backoff_multiplier = (bucket.backoff_multiplier
                    * self.config.backoff_multiplier)
                    .min(self.config.max_backoff_multiplier);
                // Never let the widened delay exceed the configured ceiling.
                let ceiling =
                    self.config.max_delay.as_secs_f64() / self.config.base_delay.as_secs_f64();
                bucket.backoff_multiplier = bucket.backoff_multiplier.min(ceiling.max(1.0));
                warn!(
                    "platform {} throttled, backoff now x{:.2} ({:?})",
                    platform,
                    bucket.backoff_multiplier,
                    bucket.current_delay()
                );
                None
            }
            Outcome::Blocked => {
                bucket.block_hits += 1;
                bucket.consecutive_successes = 0;
                bucket.in_backoff = true;
                bucket.backoff_multiplier = (bucket.backoff_multiplier
                    * self.config.backoff_multiplier)
                    .min(self.config.max_backoff_multiplier);
                // Repeated blocks widen the cooldown, not just the delay.
                let widened = Duration::from_secs_f64(
                    self.config.block_cooldown.as_secs_f64()
                        * bucket.block_hits.min(8) as f64,
                );
                bucket.cooldown_until = Some(Instant::now() + widened);
                warn!(
                    "platform {} blocked, pausing for {:?} (block #{})",
                    platform, widened, bucket.block_hits
                );
                Some(widened)
            }
        }
    }

    /// Remaining cooldown if the platform is paused after a block.
    pub async fn pause_remaining(&self, platform: &str) -> Option<Duration> {
        let buckets = self.buckets.lock().await;
        buckets
            .get(platform)
            .and_then(|b| b.cooldown_remaining(Instant::now()))
    }

    /// The minimum spacing currently in force for a platform. Queue polling
    /// never goes below this.
    pub async fn min_delay(&self, platform: &str) -> Duration {
        let buckets = self.buckets.lock().await;
        buckets
            .get(platform)
            .map(|b| b.current_delay())
            .unwrap_or(self.config.base_delay)
            .max(self.config.min_delay)
    }

    /// Statistics for all platforms seen so far.
    pub async fn stats(&self) -> HashMap<String, PlatformRateStats> {
        let buckets = self.buckets.lock().await;
        buckets
            .iter()
            .map(|(k, b)| {
                (
                    k.clone(),
                    PlatformRateStats {
                        current_delay: b.current_delay(),
                        backoff_multiplier: b.backoff_multiplier,
                        in_backoff: b.in_backoff,
                        total_requests: b.total_requests,
                        throttle_hits: b.throttle_hits,
                        block_hits: b.block_hits,
                    },
                )
            })
            .collect()
    }

    pub(crate) async fn restore_bucket(&self, platform: String, bucket: PlatformBucket) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(platform, bucket);
    }

    pub(crate) fn base_delay(&self) -> Duration {
        self.config.base_delay
    }

    pub(crate) async fn snapshot_buckets(&self) -> HashMap<String, PlatformBucket> {
        self.buckets.lock().await.clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
