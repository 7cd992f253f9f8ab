//! JSON API scraper plugin.
//!
//! Some platforms expose a search API instead of server-rendered HTML. This
//! plugin extracts candidates from JSON payloads via pointer paths, so per
//! platform configuration stays data rather than code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Availability, Price, ScrapeCandidate, SearchCriteria};
use crate::utils::normalize;

use super::{
    classify_status, Capabilities, DetectionSignal, HttpRequestSpec, ParseOutcome, PluginError,
    RawResponse, ScraperPlugin,
};

/// Pointer-path configuration for a JSON search API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonApiProfile {
    /// Search path template with `{query}`, and optional `{city}`,
    /// `{date_from}`, `{date_to}` placeholders.
    pub search_path: String,
    /// JSON pointer to the result array, e.g. "/events".
    pub results_path: String,
    /// Pointers within one result object.
    pub id_field: String,
    pub name_field: String,
    pub venue_field: String,
    pub date_field: String,
    #[serde(default)]
    pub price_field: Option<String>,
    #[serde(default)]
    pub currency_field: Option<String>,
    #[serde(default)]
    pub availability_field: Option<String>,
    /// Date formats tried before the shared defaults.
    #[serde(default)]
    pub date_formats: Vec<String>,
    /// Path of a cheap known-good endpoint for health probes.
    #[serde(default)]
    pub probe_path: Option<String>,
    #[serde(default)]
    pub supports_city: bool,
    #[serde(default)]
    pub supports_date_filter: bool,
}

/// Generic JSON API plugin driven by a `JsonApiProfile`.
pub struct JsonApiPlugin {
    platform: String,
    base_url: String,
    profile: JsonApiProfile,
    queue_poll: Option<std::time::Duration>,
}

impl JsonApiPlugin {
    pub fn new(platform: &str, base_url: &str, profile: JsonApiProfile) -> Self {
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

    fn string_at(item: &Value, pointer: &str) -> Option<String> {
        match item.pointer(pointer)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn price_of(&self, item: &Value) -> Option<Price> {
        let pointer = self.profile.price_field.as_deref()?;
        let amount_minor = match item.pointer(pointer)? {
            // Numeric prices are in major units.
            Value::Number(n) => (n.as_f64()? * 100.0).round() as i64,
            Value::String(s) => return normalize::parse_price(s),
            _ => return None,
        };
        let currency = self
            .profile
            .currency_field
            .as_deref()
            .and_then(|p| Self::string_at(item, p))
            .unwrap_or_else(|| "USD".to_string());
        Some(Price {
            amount_minor,
            currency,
        })
    }

    fn availability_of(&self, item: &Value) -> Availability {
        let Some(pointer) = self.profile.availability_field.as_deref() else {
            return Availability::Unknown;
        };
        match item.pointer(pointer) {
            Some(Value::Bool(true)) => Availability::Available,
            Some(Value::Bool(false)) => Availability::SoldOut,
            Some(Value::String(s)) => {
                Availability::from_str(&s.to_lowercase().replace(' ', "_"))
                    .unwrap_or(Availability::Unknown)
            }
            _ => Availability::Unknown,
        }
    }
}

impl ScraperPlugin for JsonApiPlugin {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            search: true,
            event_detail: true,
            availability: self.profile.availability_field.is_some(),
            date_filter: self.profile.supports_date_filter,
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
        if criteria.has_date_filter() && !self.profile.supports_date_filter {
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
        path = match criteria.date_from {
            Some(from) => path.replace("{date_from}", &from.format("%Y-%m-%d").to_string()),
            None => path.replace("{date_from}", ""),
        };
        path = match criteria.date_to {
            Some(to) => path.replace("{date_to}", &to.format("%Y-%m-%d").to_string()),
            None => path.replace("{date_to}", ""),
        };

        let mut spec = HttpRequestSpec::get(format!("{}{}", self.base_url, path));
        spec.headers
            .push(("Accept".to_string(), "application/json".to_string()));
        Ok(spec)
    }

    fn parse_response(&self, response: &RawResponse) -> ParseOutcome {
        if let Some(signal) = classify_status(response.status) {
            return ParseOutcome::detected(signal);
        }

        let Ok(payload) = serde_json::from_str::<Value>(&response.body) else {
            return ParseOutcome::detected(DetectionSignal::ParseDegraded);
        };
        let Some(results) = payload
            .pointer(&self.profile.results_path)
            .and_then(Value::as_array)
        else {
            return ParseOutcome::detected(DetectionSignal::ParseDegraded);
        };

        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        for item in results {
            let id = Self::string_at(item, &self.profile.id_field);
            let name = Self::string_at(item, &self.profile.name_field);
            let venue = Self::string_at(item, &self.profile.venue_field);
            let date_text = Self::string_at(item, &self.profile.date_field);

            let (Some(id), Some(name), Some(venue), Some(date_text)) = (id, name, venue, date_text)
            else {
                skipped += 1;
                continue;
            };
            let Some(starts_at) =
                normalize::parse_event_datetime(&date_text, &self.profile.date_formats)
            else {
                skipped += 1;
                continue;
            };

            let mut candidate =
                ScrapeCandidate::new(&self.platform, &id, &name, &venue, starts_at).as_structured();
            if let Some(price) = self.price_of(item) {
                candidate = candidate.with_price(price);
            }
            candidate = candidate.with_availability(self.availability_of(item));
            candidates.push(candidate);
        }

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
        let mut spec = HttpRequestSpec::get(format!("{}{}", self.base_url, path));
        spec.headers
            .push(("Accept".to_string(), "application/json".to_string()));
        spec
    }

    fn is_queue_page(&self, response: &RawResponse) -> bool {
        // API hosts fronted by a waiting room typically redirect to it.
        response.final_url.contains("queue-it")
            || response.body.to_lowercase().contains("waiting room")
    }

    fn queue_poll_interval(&self) -> std::time::Duration {
        self.queue_poll
            .unwrap_or(std::time::Duration::from_secs(20))
    }
}
