//! Per-platform status reporting for a scrape round.
//!
//! Callers need to distinguish "no tickets found" from "platform was
//! blocked", so every platform gets an explicit outcome alongside the merged
//! records.

use std::time::Duration;

use crate::models::{CanonicalTicketRecord, DemandLevel};

/// Terminal status of one platform's participation in a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformOutcome {
    /// Candidates extracted normally.
    Ok,
    /// Platform answered but had nothing matching.
    NoResults,
    /// Page fetched but only partially parseable. A content issue, not a
    /// blocking one.
    ParseDegraded,
    /// Rate limiting detected; backoff widened.
    Throttled,
    /// Hard block; platform paused for a cooldown window.
    Blocked,
    /// Interactive challenge page.
    Challenged,
    /// Queue wait exceeded the ceiling. Not an error.
    QueueAbandoned,
    /// Proxy pool exhausted after retry.
    NoHealthyProxy,
    /// Round deadline fired while this platform was still working. Partial
    /// results, if any, are kept.
    TimedOut,
    /// Criteria exceeded the plugin's capabilities; skipped this round.
    Skipped { reason: String },
    /// Transport or internal failure.
    Failed { error: String },
}

impl PlatformOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoResults => "no_results",
            Self::ParseDegraded => "parse_degraded",
            Self::Throttled => "throttled",
            Self::Blocked => "blocked",
            Self::Challenged => "challenged",
            Self::QueueAbandoned => "queue_abandoned",
            Self::NoHealthyProxy => "no_healthy_proxy",
            Self::TimedOut => "timed_out",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    /// Ranking used when several prewarmed sessions finish with different
    /// outcomes; the aggregate keeps the most informative one.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::NoResults => 1,
            Self::ParseDegraded => 2,
            Self::QueueAbandoned => 3,
            Self::Throttled => 4,
            Self::Challenged => 5,
            Self::Blocked => 6,
            Self::NoHealthyProxy => 7,
            Self::TimedOut => 8,
            Self::Skipped { .. } => 9,
            Self::Failed { .. } => 10,
        }
    }
}

/// One platform's line in the round report.
#[derive(Debug, Clone)]
pub struct PlatformReport {
    pub platform: String,
    pub outcome: PlatformOutcome,
    /// Candidates this platform contributed before merging.
    pub candidates: usize,
    pub latency_ms: Option<u64>,
    pub demand: DemandLevel,
    /// Scheduling hint for the external scheduler: poll this platform again
    /// after this long.
    pub poll_again: Duration,
}

/// Result of one scrape round: merged records plus per-platform status.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub records: Vec<CanonicalTicketRecord>,
    pub platforms: Vec<PlatformReport>,
    pub elapsed: Duration,
}

impl ScrapeReport {
    /// The report line for one platform, if it participated.
    pub fn platform(&self, name: &str) -> Option<&PlatformReport> {
        self.platforms.iter().find(|p| p.platform == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(PlatformOutcome::Ok.as_str(), "ok");
        assert_eq!(PlatformOutcome::Blocked.as_str(), "blocked");
        assert_eq!(
            PlatformOutcome::Skipped {
                reason: "x".to_string()
            }
            .as_str(),
            "skipped"
        );
    }

    #[test]
    fn test_severity_orders_informativeness() {
        assert!(PlatformOutcome::Ok.severity() < PlatformOutcome::Throttled.severity());
        assert!(
            PlatformOutcome::Throttled.severity()
                < PlatformOutcome::Failed {
                    error: "x".to_string()
                }
                .severity()
        );
    }
}
