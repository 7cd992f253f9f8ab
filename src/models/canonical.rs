//! Canonical ticket records: the merged, deduplicated output of a scrape
//! round.
//!
//! Identity is derived from normalized event content, never from platform
//! ids, since platforms never share identifiers for the same real event.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::candidate::{Availability, ExtractionMethod, Price};

/// One platform's contribution to a canonical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    /// Platform key the contributing candidate came from.
    pub platform: String,
    /// The platform-specific id of the contributing candidate.
    pub external_id: String,
    /// When the contributing candidate was observed.
    pub observed_at: DateTime<Utc>,
    /// How the contributing candidate was extracted.
    pub extraction: ExtractionMethod,
}

/// The merged representation of a real-world ticket/event.
///
/// A record never loses a contributing source within a merge pass, and its
/// confidence grows with the number of independently agreeing sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTicketRecord {
    /// Stable identity derived from normalized name, date and venue.
    pub identity: String,
    /// Event name from the winning source.
    pub name: String,
    /// Venue from the winning source.
    pub venue: String,
    /// Scheduled start from the winning source.
    pub starts_at: NaiveDateTime,
    /// Best-known price after tie-breaking.
    pub price: Option<Price>,
    /// Best-known availability after tie-breaking.
    pub availability: Availability,
    /// All contributing sources, in deterministic order.
    pub sources: Vec<SourceAttribution>,
    /// Merge confidence in [0, 1].
    pub confidence: f64,
}

impl CanonicalTicketRecord {
    /// Compute the content-derived identity hash for a normalized
    /// name/date/venue triple.
    pub fn compute_identity(normalized_name: &str, starts_at: NaiveDateTime, normalized_venue: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_name.as_bytes());
        hasher.update(b"|");
        hasher.update(starts_at.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(normalized_venue.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Number of distinct platforms contributing to this record.
    pub fn distinct_platforms(&self) -> usize {
        let mut platforms: Vec<&str> = self.sources.iter().map(|s| s.platform.as_str()).collect();
        platforms.sort();
        platforms.dedup();
        platforms.len()
    }
}
