//! Cross-platform result merging.
//!
//! Candidates from different platforms describe the same real-world event
//! with different ids, spellings and prices. The merger groups them by
//! normalized content, reconciles conflicts deterministically, and emits
//! canonical records with a confidence score.

mod grouping;

use std::collections::HashMap;

use crate::config::MergeSection;
use crate::models::{CanonicalTicketRecord, ScrapeCandidate, SourceAttribution};
use crate::utils::normalize;

pub use grouping::candidates_match;

/// Merger tuning.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Token-set similarity threshold for treating two names as the same
    /// event.
    pub name_similarity_threshold: f64,
    /// Tolerance when comparing start times, minutes.
    pub date_tolerance_minutes: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            name_similarity_threshold: 0.8,
            date_tolerance_minutes: 120,
        }
    }
}

impl From<&MergeSection> for MergeConfig {
    fn from(section: &MergeSection) -> Self {
        Self {
            name_similarity_threshold: section.name_similarity,
            date_tolerance_minutes: section.date_tolerance_minutes,
        }
    }
}

/// Deduplicates and reconciles candidates into canonical records.
///
/// Merging is deterministic: the same candidate set always yields identical
/// output, regardless of arrival order.
#[derive(Debug, Clone, Default)]
pub struct ResultMerger {
    config: MergeConfig,
}

impl ResultMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge an unordered candidate set into canonical records.
    ///
    /// `reliability` maps platform keys to historical success ratios; it
    /// breaks ties between simultaneous observations. Unknown platforms sit
    /// at 0.5.
    pub fn merge(
        &self,
        candidates: Vec<ScrapeCandidate>,
        reliability: &HashMap<String, f64>,
    ) -> Vec<CanonicalTicketRecord> {
        // Sort on a total key first so grouping and tie-breaking never
        // depend on arrival order.
        let mut sorted = candidates;
        sorted.sort_by(|a, b| {
            a.platform
                .cmp(&b.platform)
                .then_with(|| a.external_id.cmp(&b.external_id))
                .then_with(|| a.observed_at.cmp(&b.observed_at))
        });

        let mut groups: Vec<Vec<ScrapeCandidate>> = Vec::new();
        for candidate in sorted {
            let slot = groups.iter_mut().find(|group| {
                group.first().map_or(false, |representative| {
                    candidates_match(representative, &candidate, &self.config)
                })
            });
            match slot {
                Some(group) => group.push(candidate),
                None => groups.push(vec![candidate]),
            }
        }

        let mut records: Vec<CanonicalTicketRecord> = groups
            .into_iter()
            .map(|group| self.reconcile(group, reliability))
            .collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    /// Collapse one group into a canonical record.
    fn reconcile(
        &self,
        group: Vec<ScrapeCandidate>,
        reliability: &HashMap<String, f64>,
    ) -> CanonicalTicketRecord {
        let score = |platform: &str| reliability.get(platform).copied().unwrap_or(0.5);

        // Winner: most recently observed; simultaneous observations go to
        // the historically more reliable plugin, then platform name keeps
        // the order total.
        let winner = group
            .iter()
            .max_by(|a, b| {
                a.observed_at
                    .cmp(&b.observed_at)
                    .then_with(|| {
                        score(&a.platform)
                            .partial_cmp(&score(&b.platform))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| b.platform.cmp(&a.platform))
            })
            .cloned()
            .unwrap_or_else(|| group[0].clone());

        let mut sources: Vec<SourceAttribution> = group
            .iter()
            .map(|c| SourceAttribution {
                platform: c.platform.clone(),
                external_id: c.external_id.clone(),
                observed_at: c.observed_at,
                extraction: c.extraction,
            })
            .collect();
        sources.sort_by(|a, b| {
            a.platform
                .cmp(&b.platform)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });

        let identity = CanonicalTicketRecord::compute_identity(
            &normalize::normalize_name(&winner.name),
            winner.starts_at,
            &normalize::normalize_venue(&winner.venue),
        );
        let confidence = self.confidence(&group);

        CanonicalTicketRecord {
            identity,
            name: winner.name,
            venue: winner.venue,
            starts_at: winner.starts_at,
            price: winner.price,
            availability: winner.availability,
            sources,
            confidence,
        }
    }

    /// Confidence in [0, 1], strictly increasing in the number of distinct
    /// agreeing platforms and reduced by conflicting observations.
    fn confidence(&self, group: &[ScrapeCandidate]) -> f64 {
        let mut platforms: Vec<&str> = group.iter().map(|c| c.platform.as_str()).collect();
        platforms.sort();
        platforms.dedup();
        let agreement = platforms.len() as f64;

        // Saturating curve: 1 source -> 0.5, 2 -> 0.75, 3 -> ~0.83.
        let base = 1.0 - 0.5 / agreement;

        let mut prices: Vec<i64> = group
            .iter()
            .filter_map(|c| c.price.as_ref().map(|p| p.amount_minor))
            .collect();
        prices.sort_unstable();
        prices.dedup();

        let mut availabilities: Vec<&str> = group
            .iter()
            .map(|c| c.availability.as_str())
            .collect();
        availabilities.sort_unstable();
        availabilities.dedup();

        let mut penalty = 0.0;
        if prices.len() > 1 {
            penalty += 0.08;
        }
        if availabilities.len() > 1 {
            penalty += 0.08;
        }

        (base - penalty).clamp(0.0, 1.0)
    }
}
