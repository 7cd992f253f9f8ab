//! Demand classification and strategy selection.
//!
//! High-demand targets get shorter polling intervals and more prewarmed
//! sessions; presale targets may additionally authorize a queue bypass
//! attempt. Prewarm counts are always bounded by the global concurrency cap
//! so an eager strategy cannot cause self-inflicted rate-limit violations.

use std::time::Duration;

use crate::config::{DemandSection, PlatformEntry};
use crate::models::{DemandLevel, ScrapeStrategy, SearchCriteria};
use crate::plugins::StatsSnapshot;

/// Classifies targets and selects a scraping strategy.
#[derive(Debug, Clone)]
pub struct HighDemandPrioritizer {
    config: DemandSection,
    /// Global concurrency ceiling; prewarm never exceeds it.
    concurrency_cap: usize,
}

impl HighDemandPrioritizer {
    pub fn new(config: DemandSection, concurrency_cap: usize) -> Self {
        Self {
            config,
            concurrency_cap: concurrency_cap.max(1),
        }
    }

    /// Classify a scrape target.
    ///
    /// Signals, strongest first: an explicit presale flag on the criteria or
    /// the platform, membership of the query in the configured high-demand
    /// list, then historical scrape velocity against the platform.
    pub fn classify(
        &self,
        entry: &PlatformEntry,
        criteria: &SearchCriteria,
        stats: &StatsSnapshot,
    ) -> DemandLevel {
        if criteria.presale || entry.presale {
            return DemandLevel::Presale;
        }

        let query = criteria.query.to_lowercase();
        let listed = self
            .config
            .high_demand_terms
            .iter()
            .any(|term| query.contains(&term.to_lowercase()));
        if listed {
            return DemandLevel::High;
        }

        if stats.calls >= self.config.velocity_threshold && self.config.velocity_threshold > 0 {
            return DemandLevel::Elevated;
        }

        DemandLevel::Normal
    }

    /// Map a demand level to a strategy.
    pub fn select_strategy(&self, level: DemandLevel) -> ScrapeStrategy {
        let (poll_secs, prewarm, bypass) = match level {
            DemandLevel::Normal => (300, 1, false),
            DemandLevel::Elevated => (120, 1, false),
            DemandLevel::High => (30, 2, false),
            DemandLevel::Presale => (10, 4, true),
        };
        ScrapeStrategy {
            poll_interval_hint: Duration::from_secs(poll_secs),
            session_prewarm_count: prewarm.min(self.concurrency_cap),
            auto_queue_bypass: bypass,
        }
    }
}
