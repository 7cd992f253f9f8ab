//! Raw extraction results produced by scraper plugins.
//!
//! A candidate is a single-source, unverified event/ticket extraction.
//! Candidates are consumed by the merger, which reconciles them into
//! canonical records.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ticket availability as reported by a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    Limited,
    SoldOut,
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Limited => "limited",
            Self::SoldOut => "sold_out",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "limited" => Some(Self::Limited),
            "sold_out" => Some(Self::SoldOut),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A price in minor units (cents) with its ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in minor units, e.g. 5500 for $55.00.
    pub amount_minor: i64,
    /// ISO currency code, e.g. "USD".
    pub currency: String,
}

impl Price {
    pub fn new(amount_minor: i64, currency: &str) -> Self {
        Self {
            amount_minor,
            currency: currency.to_string(),
        }
    }
}

/// How a candidate's fields were extracted from the page.
///
/// Structured extraction (JSON-LD, API payloads) is a stronger confidence
/// hint than heuristic extraction from free-form markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Structured,
    Heuristic,
}

/// One raw extracted event/ticket, before cross-platform merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeCandidate {
    /// Platform key this candidate came from.
    pub platform: String,
    /// Platform-specific identifier. Never shared across platforms.
    pub external_id: String,
    /// Event name as shown on the platform.
    pub name: String,
    /// Venue name as shown on the platform.
    pub venue: String,
    /// Scheduled start of the event, platform-local.
    pub starts_at: NaiveDateTime,
    /// Best-known price, if the platform exposes one.
    pub price: Option<Price>,
    /// Availability status.
    pub availability: Availability,
    /// Extraction confidence hint.
    pub extraction: ExtractionMethod,
    /// When this candidate was observed.
    pub observed_at: DateTime<Utc>,
}

impl ScrapeCandidate {
    /// Create a candidate with the required identifying fields.
    pub fn new(
        platform: &str,
        external_id: &str,
        name: &str,
        venue: &str,
        starts_at: NaiveDateTime,
    ) -> Self {
        Self {
            platform: platform.to_string(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            venue: venue.to_string(),
            starts_at,
            price: None,
            availability: Availability::Unknown,
            extraction: ExtractionMethod::Heuristic,
            observed_at: Utc::now(),
        }
    }

    /// Set the observed price.
    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the availability status.
    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Mark the candidate as extracted from structured data.
    pub fn as_structured(mut self) -> Self {
        self.extraction = ExtractionMethod::Structured;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_availability_round_trip() {
        for status in [
            Availability::Available,
            Availability::Limited,
            Availability::SoldOut,
            Availability::Unknown,
        ] {
            assert_eq!(Availability::from_str(status.as_str()), Some(status));
        }
        assert_eq!(Availability::from_str("bogus"), None);
    }

    #[test]
    fn test_candidate_builders() {
        let when = NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(19, 30, 0)
            .unwrap();
        let candidate = ScrapeCandidate::new("ticketmax", "tm-991", "Team X vs Team Y", "Stadium Z", when)
            .with_price(Price::new(5000, "USD"))
            .with_availability(Availability::Limited)
            .as_structured();

        assert_eq!(candidate.price.as_ref().unwrap().amount_minor, 5000);
        assert_eq!(candidate.availability, Availability::Limited);
        assert_eq!(candidate.extraction, ExtractionMethod::Structured);
    }
}
