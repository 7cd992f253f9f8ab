//! Profile-driven HTML scraper plugin.
//!
//! Most target platforms differ only in selectors and URL templates, so one
//! generic implementation parameterized by a per-platform profile replaces a
//! pile of near-identical plugin classes. Platforms with genuinely bespoke
//! behavior get their own implementation instead (see `json_api`).

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{Availability, ScrapeCandidate, SearchCriteria};
use crate::utils::normalize;

use super::{
    classify_status, looks_like_challenge, Capabilities, DetectionSignal, HttpRequestSpec,
    ParseOutcome, PluginError, RawResponse, ScraperPlugin,
};

/// Per-platform selector and URL configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Search URL template relative to the base URL, with `{query}` and
    /// optional `{city}` placeholders.
    pub search_path: String,
    /// Selector for one event/ticket item.
    pub event_selector: String,
    /// Selector for the event name within an item.
    pub name_selector: String,
    /// Selector for the venue within an item.
    pub venue_selector: String,
    /// Selector for the date/time text within an item.
    pub date_selector: String,
    /// Selector for the price text within an item.
    #[serde(default)]
    pub price_selector: Option<String>,
    /// Selector for the availability text within an item.
    #[serde(default)]
    pub availability_selector: Option<String>,
    /// Attribute holding the platform's item id; falls back to the first
    /// link href, then to a content hash.
    #[serde(default)]
    pub id_attr: Option<String>,
    /// Date formats tried before the shared defaults.
    #[serde(default)]
    pub date_formats: Vec<String>,
    /// Body substrings that mark a virtual waiting-room page.
    #[serde(default)]
    pub queue_markers: Vec<String>,
    /// Item text markers that mean sold out.
    #[serde(default)]
    pub sold_out_markers: Vec<String>,
    /// Path of a cheap known-good page for health probes.
    #[serde(default)]
    pub probe_path: Option<String>,
    /// Path of the platform's queue bypass endpoint, if it has one.
    #[serde(default)]
    pub bypass_path: Option<String>,
    /// Whether the platform search supports a city filter.
    #[serde(default)]
    pub supports_city: bool,
}

/// Generic HTML plugin driven by a `PlatformProfile`.
pub struct ProfilePlugin {
    platform: String,
    base_url: String,
    profile: PlatformProfile,
    queue_poll: Option<std::time::Duration>,
}

impl ProfilePlugin {
    pub fn new(platform: &str, base_url: &str, profile: PlatformProfile) -> Self {
        Self {
            platform: platform.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            profile,
            queue_poll: None,
        }
    }

    /// Override the queue poll hint, typically from platform configuration.
    pub fn with_queue_poll(mut self, interval: std::time::Duration) -> Self {
        self.queue_poll = Some(interval);
        self
    }

    fn select_text(item: &ElementRef, selector: &str) -> Option<String> {
        let parsed = Selector::parse(selector).ok()?;
        let text: String = item
            .select(&parsed)
            .next()?
            .text()
            .collect::<Vec<_>>()
            .join(" ");
        let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    fn extract_id(&self, item: &ElementRef, name: &str, date_text: &str) -> String {
        if let Some(attr) = &self.profile.id_attr {
            if let Some(value) = item.value().attr(attr) {
                return value.to_string();
            }
        }
        if let Ok(link) = Selector::parse("a[href]") {
            if let Some(href) = item.select(&link).next().and_then(|a| a.value().attr("href")) {
                return href.to_string();
            }
        }
        // Last resort: content hash, stable for identical listings.
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(date_text.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    fn availability_from(&self, text: Option<&str>) -> Availability {
        let Some(text) = text else {
            return Availability::Unknown;
        };
        let lower = text.to_lowercase();
        if self
            .profile
            .sold_out_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
            || lower.contains("sold out")
        {
            Availability::SoldOut
        } else if lower.contains("limited") || lower.contains("low availability") {
            Availability::Limited
        } else {
            Availability::Available
        }
    }
}

impl ScraperPlugin for ProfilePlugin {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            event_detail: false,
            availability: self.profile.availability_selector.is_some(),
            date_filter: false,
            city_filter: self.profile.supports_city,
        }
    }

    fn build_request(&self, criteria: &SearchCriteria) -> Result<HttpRequestSpec, PluginError> {
        if criteria.city.is_some() && !self.profile.supports_city {
            return Err(PluginError::UnsupportedCriteria {
                platform: self.platform.clone(),
                reason: "city filter not supported".to_string(),
            });
        }
        if criteria.has_date_filter() {
            return Err(PluginError::UnsupportedCriteria {
                platform: self.platform.clone(),
                reason: "date filter not supported".to_string(),
            });
        }

        let mut path = self
            .profile
            .search_path
            .replace("{query}", &urlencoding::encode(&criteria.query));
        path = match &criteria.city {
            Some(city) => path.replace("{city}", &urlencoding::encode(city)),
            None => path.replace("{city}", ""),
        };
        Ok(HttpRequestSpec::get(format!("{}{}", self.base_url, path)))
    }

    fn parse_response(&self, response: &RawResponse) -> ParseOutcome {
        if let Some(signal) = classify_status(response.status) {
            if signal == DetectionSignal::Blocked && looks_like_challenge(&response.body) {
                return ParseOutcome::detected(DetectionSignal::Challenged);
            }
            return ParseOutcome::detected(signal);
        }
        if looks_like_challenge(&response.body) {
            return ParseOutcome::detected(DetectionSignal::Challenged);
        }

        let Ok(event_selector) = Selector::parse(&self.profile.event_selector) else {
            return ParseOutcome::detected(DetectionSignal::ParseDegraded);
        };

        let document = Html::parse_document(&response.body);
        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        for item in document.select(&event_selector) {
            let name = Self::select_text(&item, &self.profile.name_selector);
            let venue = Self::select_text(&item, &self.profile.venue_selector);
            let date_text = Self::select_text(&item, &self.profile.date_selector);

            let (Some(name), Some(venue), Some(date_text)) = (name, venue, date_text) else {
                skipped += 1;
                continue;
            };
            let Some(starts_at) =
                normalize::parse_event_datetime(&date_text, &self.profile.date_formats)
            else {
                skipped += 1;
                continue;
            };

            let external_id = self.extract_id(&item, &name, &date_text);
            let mut candidate =
                ScrapeCandidate::new(&self.platform, &external_id, &name, &venue, starts_at);

            if let Some(selector) = &self.profile.price_selector {
                if let Some(text) = Self::select_text(&item, selector) {
                    if let Some(price) = normalize::parse_price(&text) {
                        candidate = candidate.with_price(price);
                    }
                }
            }
            let availability_text = self
                .profile
                .availability_selector
                .as_ref()
                .and_then(|s| Self::select_text(&item, s));
            candidate = candidate.with_availability(
                self.availability_from(availability_text.as_deref()),
            );

            candidates.push(candidate);
        }

        // Items present but none parseable means the markup drifted under
        // us; empty page with no items is an ordinary no-result response.
        let detection = if skipped > 0 {
            Some(DetectionSignal::ParseDegraded)
        } else {
            None
        };

        ParseOutcome {
            candidates,
            detection,
        }
    }

    fn probe_request(&self) -> HttpRequestSpec {
        let path = self.profile.probe_path.as_deref().unwrap_or("/");
        HttpRequestSpec::get(format!("{}{}", self.base_url, path))
    }

    fn is_queue_page(&self, response: &RawResponse) -> bool {
        let lower = response.body.to_lowercase();
        let marker_hit = self
            .profile
            .queue_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()));
        marker_hit
            || response.final_url.contains("queue-it")
            || lower.contains("waiting room")
            || lower.contains("you are now in line")
    }

    fn queue_poll_interval(&self) -> std::time::Duration {
        self.queue_poll
            .unwrap_or(std::time::Duration::from_secs(20))
    }

    fn bypass_request(&self) -> Option<HttpRequestSpec> {
        self.profile
            .bypass_path
            .as_ref()
            .map(|path| HttpRequestSpec::get(format!("{}{}", self.base_url, path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn profile() -> PlatformProfile {
        PlatformProfile {
            search_path: "/search?q={query}".to_string(),
            event_selector: "li.event".to_string(),
            name_selector: ".name".to_string(),
            venue_selector: ".venue".to_string(),
            date_selector: ".date".to_string(),
            price_selector: Some(".price".to_string()),
            availability_selector: Some(".status".to_string()),
            id_attr: Some("data-id".to_string()),
            queue_markers: vec!["virtual queue".to_string()],
            ..Default::default()
        }
    }

    fn plugin() -> ProfilePlugin {
        ProfilePlugin::new("ticketmax", "https://ticketmax.test", profile())
    }

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            final_url: "https://ticketmax.test/search?q=x".to_string(),
            headers: HashMap::new(),
            body: body.to_string(),
            elapsed: Duration::from_millis(80),
        }
    }

    const LISTING: &str = r#"
        <html><body><ul>
          <li class="event" data-id="ev-1">
            <span class="name">Team X vs Team Y</span>
            <span class="venue">Stadium Z</span>
            <span class="date">2025-05-01 19:30</span>
            <span class="price">$50.00</span>
            <span class="status">Available</span>
          </li>
          <li class="event" data-id="ev-2">
            <span class="name">Quiet Concert</span>
            <span class="venue">Small Hall</span>
            <span class="date">2025-06-10 20:00</span>
            <span class="price">from $25.00</span>
            <span class="status">Sold Out</span>
          </li>
        </ul></body></html>"#;

    #[test]
    fn test_build_request_encodes_query() {
        let spec = plugin()
            .build_request(&SearchCriteria::for_query("team x"))
            .unwrap();
        assert_eq!(spec.url, "https://ticketmax.test/search?q=team%20x");
    }

    #[test]
    fn test_build_request_rejects_unsupported_city() {
        let mut criteria = SearchCriteria::for_query("team x");
        criteria.city = Some("Springfield".to_string());
        assert!(matches!(
            plugin().build_request(&criteria),
            Err(PluginError::UnsupportedCriteria { .. })
        ));
    }

    #[test]
    fn test_parse_listing() {
        let outcome = plugin().parse_response(&response(200, LISTING));
        assert_eq!(outcome.candidates.len(), 2);
        assert!(outcome.detection.is_none());

        let first = &outcome.candidates[0];
        assert_eq!(first.external_id, "ev-1");
        assert_eq!(first.name, "Team X vs Team Y");
        assert_eq!(first.price.as_ref().unwrap().amount_minor, 5000);
        assert_eq!(first.availability, Availability::Available);
        assert_eq!(outcome.candidates[1].availability, Availability::SoldOut);
    }

    #[test]
    fn test_parse_empty_page_is_no_results() {
        let outcome = plugin().parse_response(&response(200, "<html><body></body></html>"));
        assert!(outcome.candidates.is_empty());
        assert!(outcome.detection.is_none());
    }

    #[test]
    fn test_parse_degraded_on_unusable_items() {
        let body = r#"<li class="event"><span class="name">Only A Name</span></li>"#;
        let outcome = plugin().parse_response(&response(200, body));
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.detection, Some(DetectionSignal::ParseDegraded));
    }

    #[test]
    fn test_parse_classifies_throttle_and_block() {
        assert_eq!(
            plugin().parse_response(&response(429, "")).detection,
            Some(DetectionSignal::Throttled)
        );
        assert_eq!(
            plugin().parse_response(&response(403, "denied")).detection,
            Some(DetectionSignal::Blocked)
        );
        assert_eq!(
            plugin()
                .parse_response(&response(403, "solve this captcha"))
                .detection,
            Some(DetectionSignal::Challenged)
        );
    }

    #[test]
    fn test_queue_page_detection() {
        let queue = response(200, "<p>You are in the Virtual Queue, hold on</p>");
        assert!(plugin().is_queue_page(&queue));
        assert!(!plugin().is_queue_page(&response(200, LISTING)));
    }
}
