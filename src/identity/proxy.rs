//! Egress proxy pool with health scoring.
//!
//! Proxies are checked out per session and returned when the session ends,
//! so a cancelled task never leaks its proxy. Health decays on failure and
//! recovers on success; a proxy below the health floor sits out a cooldown
//! before it is eligible again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Health below this excludes a proxy from selection.
const HEALTH_FLOOR: f64 = 0.3;
/// Consecutive failures that push a proxy into cooldown.
const FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Every proxy in the pool is unhealthy, cooling down or checked out.
    #[error("no healthy proxy available in pool '{0}'")]
    NoHealthyProxy(String),
    /// The pool name is not configured.
    #[error("unknown proxy pool '{0}'")]
    UnknownPool(String),
}

/// Supported proxy protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Socks5,
}

impl ProxyScheme {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("socks5://") || url.starts_with("socks5h://") {
            Self::Socks5
        } else {
            Self::Http
        }
    }
}

/// One egress proxy and its rolling health.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    /// Full proxy URL, e.g. "socks5://10.0.0.1:1080".
    pub address: String,
    pub scheme: ProxyScheme,
    /// Rolling success ratio in [0, 1].
    pub health: f64,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
    pub last_used: Option<Instant>,
    pub in_use: bool,
}

impl ProxyRecord {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            scheme: ProxyScheme::from_url(address),
            health: 1.0,
            consecutive_failures: 0,
            cooldown_until: None,
            last_used: None,
            in_use: false,
        }
    }

    fn eligible(&self, now: Instant) -> bool {
        if self.in_use || self.health < HEALTH_FLOOR {
            return false;
        }
        match self.cooldown_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    pools: HashMap<String, Vec<ProxyRecord>>,
}

/// Rotates proxies per pool, preferring the healthiest eligible record.
#[derive(Debug, Default)]
pub struct ProxyRotator {
    cooldown: Duration,
    state: Mutex<PoolState>,
}

impl ProxyRotator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Add a proxy to one or more pools.
    pub async fn register(&self, address: &str, pools: &[String]) {
        let mut state = self.state.lock().await;
        for pool in pools {
            state
                .pools
                .entry(pool.clone())
                .or_default()
                .push(ProxyRecord::new(address));
        }
    }

    /// Check out the healthiest eligible proxy from a pool.
    ///
    /// Ties on health go to the least recently used record. An empty or
    /// unconfigured pool is not an error for direct-connection setups; the
    /// caller decides whether to treat `UnknownPool` as fatal.
    pub async fn next_proxy(&self, pool: &str) -> Result<ProxyRecord, ProxyError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let records = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| ProxyError::UnknownPool(pool.to_string()))?;

        let best = records
            .iter_mut()
            .filter(|r| r.eligible(now))
            .max_by(|a, b| {
                a.health
                    .partial_cmp(&b.health)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        // Least recently used wins the tie, so an unused
                        // record sorts above any used one.
                        a.last_used.cmp(&b.last_used).reverse()
                    })
            });

        match best {
            Some(record) => {
                record.in_use = true;
                record.last_used = Some(now);
                debug!("checked out proxy {} from pool {}", record.address, pool);
                Ok(record.clone())
            }
            None => Err(ProxyError::NoHealthyProxy(pool.to_string())),
        }
    }

    /// Report the outcome of requests made through a proxy.
    ///
    /// Three consecutive failures push the proxy into cooldown.
    pub async fn report_outcome(&self, address: &str, success: bool) {
        let mut state = self.state.lock().await;
        for records in state.pools.values_mut() {
            for record in records.iter_mut().filter(|r| r.address == address) {
                if success {
                    record.health = (record.health * 0.8 + 0.2).min(1.0);
                    record.consecutive_failures = 0;
                } else {
                    record.health *= 0.6;
                    record.consecutive_failures += 1;
                    if record.consecutive_failures >= FAILURE_LIMIT {
                        record.cooldown_until = Some(Instant::now() + self.cooldown);
                        record.consecutive_failures = 0;
                        // Floor the health so the record is selectable again
                        // once its cooldown lapses.
                        record.health = record.health.max(HEALTH_FLOOR);
                        warn!(
                            "proxy {} entering cooldown for {:?} (health {:.2})",
                            address, self.cooldown, record.health
                        );
                    }
                }
            }
        }
    }

    /// Return a checked-out proxy to its pool.
    pub async fn release(&self, address: &str) {
        let mut state = self.state.lock().await;
        for records in state.pools.values_mut() {
            for record in records.iter_mut().filter(|r| r.address == address) {
                record.in_use = false;
            }
        }
    }

    /// The shortest remaining cooldown across a pool, if any proxy is
    /// cooling down. Used to schedule a retry after pool exhaustion.
    pub async fn shortest_cooldown(&self, pool: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .pools
            .get(pool)?
            .iter()
            .filter(|r| !r.in_use)
            .filter_map(|r| r.cooldown_until)
            .filter_map(|until| until.checked_duration_since(now))
            .min()
    }

    /// Number of records currently available for checkout in a pool.
    pub async fn available_count(&self, pool: &str) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .pools
            .get(pool)
            .map(|records| records.iter().filter(|r| r.eligible(now)).count())
            .unwrap_or(0)
    }

    /// Whether any pool has been configured at all.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.pools.values().all(|v| v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator() -> ProxyRotator {
        ProxyRotator::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_checkout_and_release_restores_count() {
        let rotator = rotator();
        rotator
            .register("http://p1:8080", &["default".to_string()])
            .await;
        rotator
            .register("http://p2:8080", &["default".to_string()])
            .await;

        assert_eq!(rotator.available_count("default").await, 2);
        let proxy = rotator.next_proxy("default").await.unwrap();
        assert_eq!(rotator.available_count("default").await, 1);
        rotator.release(&proxy.address).await;
        assert_eq!(rotator.available_count("default").await, 2);
    }

    #[tokio::test]
    async fn test_three_failures_trigger_cooldown() {
        let rotator = rotator();
        rotator
            .register("http://p1:8080", &["default".to_string()])
            .await;

        for _ in 0..3 {
            rotator.report_outcome("http://p1:8080", false).await;
        }
        assert_eq!(rotator.available_count("default").await, 0);
        assert!(rotator.shortest_cooldown("default").await.is_some());

        // Cooldown expires and the proxy becomes eligible again.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rotator.available_count("default").await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_errors() {
        let rotator = rotator();
        rotator
            .register("http://p1:8080", &["default".to_string()])
            .await;

        let first = rotator.next_proxy("default").await.unwrap();
        assert_eq!(first.address, "http://p1:8080");
        let second = rotator.next_proxy("default").await;
        assert!(matches!(second, Err(ProxyError::NoHealthyProxy(_))));
    }

    #[tokio::test]
    async fn test_prefers_healthiest() {
        let rotator = rotator();
        rotator
            .register("http://sick:8080", &["default".to_string()])
            .await;
        rotator
            .register("http://fit:8080", &["default".to_string()])
            .await;
        rotator.report_outcome("http://sick:8080", false).await;

        let proxy = rotator.next_proxy("default").await.unwrap();
        assert_eq!(proxy.address, "http://fit:8080");
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let rotator = rotator();
        assert!(matches!(
            rotator.next_proxy("nope").await,
            Err(ProxyError::UnknownPool(_))
        ));
    }

    #[test]
    fn test_scheme_detection() {
        assert_eq!(
            ProxyScheme::from_url("socks5://1.2.3.4:1080"),
            ProxyScheme::Socks5
        );
        assert_eq!(
            ProxyScheme::from_url("http://1.2.3.4:8080"),
            ProxyScheme::Http
        );
    }
}
