//! Demand classification and scraping strategy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How contested a scrape target is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandLevel {
    Normal,
    Elevated,
    High,
    Presale,
}

impl DemandLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Presale => "presale",
        }
    }
}

/// Scraping strategy selected for a demand level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeStrategy {
    /// Suggested re-poll interval for the external scheduler.
    pub poll_interval_hint: Duration,
    /// Number of prewarmed sessions to dispatch concurrently.
    pub session_prewarm_count: usize,
    /// Whether a queue bypass attempt is authorized.
    pub auto_queue_bypass: bool,
}
