//! Scraper plugin interface and shared request/response types.
//!
//! Plugins never perform network I/O. They build request specs and parse
//! responses, which keeps every plugin testable without network access; the
//! transport layer owns the actual HTTP call.

pub mod json_api;
pub mod profile;
pub mod registry;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::models::{ScrapeCandidate, SearchCriteria};

pub use json_api::{JsonApiPlugin, JsonApiProfile};
pub use profile::{PlatformProfile, ProfilePlugin};
pub use registry::{PluginDescriptor, PluginRegistry, RegistryError, StatsSnapshot};

/// What a plugin declares it can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Free-text search.
    pub search: bool,
    /// Fetching a single event's detail page.
    pub event_detail: bool,
    /// Checking ticket availability.
    pub availability: bool,
    /// Filtering search results by date range.
    pub date_filter: bool,
    /// Filtering search results by city.
    pub city_filter: bool,
}

/// HTTP method for a request spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully described outbound request, produced by a plugin and executed by
/// the transport.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: Method,
    pub url: String,
    /// Plugin-specific headers on top of the session fingerprint.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequestSpec {
    pub fn get(url: String) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// A fetched response handed to a plugin for parsing.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// URL after redirects; queue pages often live on a different host.
    pub final_url: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
}

impl RawResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }
}

/// A plugin's explicit indication that a response is not ordinary content.
///
/// Distinguishing these from "no results" matters: a block needs backoff and
/// a platform pause, a queue page needs the queue navigator, and a parse
/// degradation needs neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSignal {
    /// Rate limiting detected (429, Retry-After).
    Throttled,
    /// Hard block (403 walls, access denied pages).
    Blocked,
    /// Interactive challenge (captcha, JS challenge).
    Challenged,
    /// Virtual waiting-room page.
    QueuePage,
    /// Page fetched but not fully parseable; a content issue, not blocking.
    ParseDegraded,
}

/// Parse result: candidates plus an optional detection signal.
///
/// Parsing never fails hard; a malformed page yields an empty or partial
/// candidate list with `ParseDegraded` so one bad page cannot abort the
/// platform.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub candidates: Vec<ScrapeCandidate>,
    pub detection: Option<DetectionSignal>,
}

impl ParseOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn detected(signal: DetectionSignal) -> Self {
        Self {
            candidates: Vec::new(),
            detection: Some(signal),
        }
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    /// The criteria exceed this plugin's declared capabilities.
    #[error("unsupported criteria for {platform}: {reason}")]
    UnsupportedCriteria { platform: String, reason: String },
    /// The plugin's configuration cannot produce a valid request.
    #[error("invalid plugin configuration for {platform}: {reason}")]
    InvalidConfig { platform: String, reason: String },
}

/// One scraping plugin per target platform.
///
/// Implementations hold their rate limiting, proxying and normalization
/// collaborators by composition; nothing here performs I/O.
pub trait ScraperPlugin: Send + Sync {
    /// Platform key this plugin targets.
    fn platform(&self) -> &str;

    /// Declared capability set. Pure.
    fn capabilities(&self) -> Capabilities;

    /// Build a search request for the criteria. Deterministic given the
    /// criteria and plugin configuration.
    fn build_request(&self, criteria: &SearchCriteria) -> Result<HttpRequestSpec, PluginError>;

    /// Parse a response into candidates and an optional detection signal.
    fn parse_response(&self, response: &RawResponse) -> ParseOutcome;

    /// A lightweight known-good request used for health probes. The
    /// registry executes it and judges health via `parse_response`.
    fn probe_request(&self) -> HttpRequestSpec;

    /// Platform heuristics for recognizing a virtual waiting-room page.
    fn is_queue_page(&self, response: &RawResponse) -> bool {
        let _ = response;
        false
    }

    /// Suggested interval between queue status polls.
    fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Platform-specific queue bypass request, if the platform has one.
    fn bypass_request(&self) -> Option<HttpRequestSpec> {
        None
    }
}

/// Map an HTTP status to a detection signal, if it indicates one.
///
/// 429 and 503 are rate limiting; 403 is treated as a block at this layer,
/// body-level challenge markers refine that to `Challenged`.
pub fn classify_status(status: u16) -> Option<DetectionSignal> {
    match status {
        429 | 503 => Some(DetectionSignal::Throttled),
        403 => Some(DetectionSignal::Blocked),
        _ => None,
    }
}

/// Body markers that indicate an interactive challenge page.
pub fn looks_like_challenge(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["captcha", "cf-chl", "challenge-platform", "are you a robot", "press & hold"]
        .iter()
        .any(|marker| lower.contains(marker))
}
