//! Candidate grouping predicate.

use chrono::Duration;

use crate::models::ScrapeCandidate;
use crate::utils::normalize;

use super::MergeConfig;

/// Whether two candidates describe the same real-world event.
///
/// Platforms never share ids, so the key is content: name similarity above
/// the threshold, start times within tolerance, and the same normalized
/// venue.
pub fn candidates_match(a: &ScrapeCandidate, b: &ScrapeCandidate, config: &MergeConfig) -> bool {
    if normalize::normalize_venue(&a.venue) != normalize::normalize_venue(&b.venue) {
        return false;
    }

    let tolerance = Duration::minutes(config.date_tolerance_minutes);
    let gap = (a.starts_at - b.starts_at).abs();
    if gap > tolerance {
        return false;
    }

    normalize::token_set_similarity(&a.name, &b.name) >= config.name_similarity_threshold
}
