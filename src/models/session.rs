//! Ephemeral request identities.
//!
//! A session is one fingerprint + proxy + cookie jar used for a bounded
//! burst of requests against a single platform. Sessions are discarded once
//! their budget or age is exceeded, or on a detection signal. They are never
//! reused across unrelated scrape tasks.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::identity::proxy::ProxyRecord;

/// A consistent browser-like request identity.
///
/// The header set is ordered and internally consistent: the chosen user
/// agent implies its matching Accept/Accept-Language/sec-ch-ua values.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: String,
    /// Headers in browser emission order, user agent excluded.
    pub headers: Vec<(String, String)>,
    /// Simulated viewport, width x height.
    pub viewport: (u32, u32),
    /// Human delay range in milliseconds for pacing within the session.
    pub jitter_ms: (u64, u64),
}

/// One ephemeral identity for a burst of requests to a single platform.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub platform: String,
    pub fingerprint: Fingerprint,
    /// Assigned egress proxy, if the platform's pool has one available.
    pub proxy: Option<ProxyRecord>,
    pub cookies: HashMap<String, String>,
    pub created_at: Instant,
    pub requests_made: u32,
    /// Request budget before the session must be discarded.
    pub max_requests: u32,
    /// Age ceiling before the session must be discarded.
    pub max_age: Duration,
}

impl Session {
    pub fn new(platform: &str, fingerprint: Fingerprint, proxy: Option<ProxyRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            fingerprint,
            proxy,
            cookies: HashMap::new(),
            created_at: Instant::now(),
            requests_made: 0,
            max_requests: 12,
            max_age: Duration::from_secs(300),
        }
    }

    /// Set the request budget.
    pub fn with_budget(mut self, max_requests: u32, max_age: Duration) -> Self {
        self.max_requests = max_requests;
        self.max_age = max_age;
        self
    }

    /// Record one issued request against the budget.
    pub fn note_request(&mut self) {
        self.requests_made += 1;
    }

    /// True once the request budget or age threshold is exceeded.
    pub fn exhausted(&self) -> bool {
        self.requests_made >= self.max_requests || self.created_at.elapsed() >= self.max_age
    }

    /// A human-like delay drawn from the fingerprint's jitter range.
    pub fn human_delay(&self) -> Duration {
        let (lo, hi) = self.fingerprint.jitter_ms;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Duration::from_millis(lo + nanos % (hi - lo))
    }

    /// The address of the assigned proxy, if any.
    pub fn proxy_address(&self) -> Option<&str> {
        self.proxy.as_ref().map(|p| p.address.as_str())
    }
}
