//! Configuration management for ticketscout.
//!
//! Settings come from a TOML file: `[scrape]` globals, a `[[proxies]]` list
//! and one `[platforms.<key>]` table per target platform. Platform entries
//! are decoded leniently: a malformed entry is skipped with a warning so one
//! bad table never takes down registry load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::plugins::{JsonApiProfile, PlatformProfile};

/// Top-level settings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub scrape: ScrapeSection,
    pub proxies: Vec<ProxyEntry>,
    pub platforms: BTreeMap<String, PlatformEntry>,
}

/// Global scraping knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSection {
    /// Global concurrency ceiling across platforms.
    pub concurrency: usize,
    /// Deadline for one scrape round, seconds.
    pub deadline_secs: u64,
    /// Request budget per session.
    pub session_max_requests: u32,
    /// Age ceiling per session, seconds.
    pub session_max_age_secs: u64,
    /// Human delay range within a session, milliseconds.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Path of the adaptive-state database. None disables persistence.
    pub state_db: Option<String>,
    pub rate: RateSection,
    pub merge: MergeSection,
    pub queue: QueueSection,
    pub demand: DemandSection,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            concurrency: 8,
            deadline_secs: 45,
            session_max_requests: 12,
            session_max_age_secs: 300,
            jitter_min_ms: 250,
            jitter_max_ms: 1500,
            state_db: None,
            rate: RateSection::default(),
            merge: MergeSection::default(),
            queue: QueueSection::default(),
            demand: DemandSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSection {
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub block_cooldown_secs: u64,
    pub recovery_threshold: u32,
    /// Proxy cooldown after repeated failures, seconds.
    pub proxy_cooldown_secs: u64,
}

impl Default for RateSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 1500,
            min_delay_ms: 250,
            max_delay_ms: 60_000,
            backoff_multiplier: 1.5,
            block_cooldown_secs: 300,
            recovery_threshold: 3,
            proxy_cooldown_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSection {
    /// Token-set similarity threshold for grouping names.
    pub name_similarity: f64,
    /// Date tolerance for grouping, minutes.
    pub date_tolerance_minutes: i64,
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            name_similarity: 0.8,
            date_tolerance_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Ceiling on queue waiting before abandoning, seconds.
    pub max_wait_secs: u64,
    /// Default poll interval when the platform gives no hint, seconds.
    pub poll_interval_secs: u64,
    /// Bypass attempts allowed per queue entry.
    pub max_bypass_attempts: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_wait_secs: 900,
            poll_interval_secs: 20,
            max_bypass_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandSection {
    /// Query terms that mark a target as high demand.
    pub high_demand_terms: Vec<String>,
    /// Calls against a platform above which it counts as elevated.
    pub velocity_threshold: u64,
}

impl Default for DemandSection {
    fn default() -> Self {
        Self {
            high_demand_terms: Vec::new(),
            velocity_threshold: 500,
        }
    }
}

/// One egress proxy and its pool memberships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub url: String,
    #[serde(default = "default_pools")]
    pub pools: Vec<String>,
}

fn default_pools() -> Vec<String> {
    vec!["default".to_string()]
}

/// Which plugin family serves a platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    #[default]
    Html,
    JsonApi,
}

/// Per-platform request budget override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateOverrideEntry {
    pub requests: u32,
    pub window_secs: u64,
}

/// One target platform's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: PlatformKind,
    /// Selector profile for HTML platforms.
    #[serde(default)]
    pub profile: Option<PlatformProfile>,
    /// Pointer profile for JSON API platforms.
    #[serde(default)]
    pub api: Option<JsonApiProfile>,
    #[serde(default)]
    pub rate_limit: Option<RateOverrideEntry>,
    /// Proxy pool this platform draws from.
    #[serde(default)]
    pub proxy_pool: Option<String>,
    /// This platform is currently running a presale.
    #[serde(default)]
    pub presale: bool,
    /// Queue poll hint override, seconds.
    #[serde(default)]
    pub queue_poll_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl PlatformEntry {
    /// Pool name this platform draws proxies from.
    pub fn pool(&self) -> &str {
        self.proxy_pool.as_deref().unwrap_or("default")
    }
}

impl Settings {
    /// Parse settings from TOML text.
    ///
    /// The `[scrape]` section and proxy list are strict; platform entries
    /// are decoded one by one and skipped with a warning on error.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let root: toml::Value = toml::from_str(text)?;

        let scrape = match root.get("scrape") {
            Some(value) => value.clone().try_into()?,
            None => ScrapeSection::default(),
        };

        let proxies = match root.get("proxies") {
            Some(value) => value.clone().try_into()?,
            None => Vec::new(),
        };

        let mut platforms = BTreeMap::new();
        if let Some(table) = root.get("platforms").and_then(|v| v.as_table()) {
            for (key, value) in table {
                match value.clone().try_into::<PlatformEntry>() {
                    Ok(entry) => {
                        platforms.insert(key.clone(), entry);
                    }
                    Err(e) => {
                        warn!("skipping malformed platform entry '{}': {}", key, e);
                    }
                }
            }
        }

        Ok(Self {
            scrape,
            proxies,
            platforms,
        })
    }

    /// Load settings from a file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        Self::from_toml(&text)
    }

    /// Resolve the config file path: explicit flag, working directory, then
    /// the user config directory.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
            return Some(PathBuf::from(expanded));
        }
        let local = PathBuf::from("ticketscout.toml");
        if local.exists() {
            return Some(local);
        }
        let user = dirs::config_dir()?.join("ticketscout").join("config.toml");
        if user.exists() {
            return Some(user);
        }
        None
    }

    /// Expanded adaptive-state database path, if persistence is enabled.
    pub fn state_db_path(&self) -> Option<PathBuf> {
        self.scrape
            .state_db
            .as_ref()
            .map(|raw| PathBuf::from(shellexpand::tilde(raw).to_string()))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.scrape.deadline_secs)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.scrape.session_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [scrape]
        concurrency = 4
        deadline_secs = 30
        state_db = "~/state.db"

        [scrape.rate]
        base_delay_ms = 800

        [[proxies]]
        url = "socks5://10.0.0.1:1080"
        pools = ["default", "premium"]

        [platforms.ticketmax]
        base_url = "https://ticketmax.test"
        [platforms.ticketmax.profile]
        search_path = "/search?q={query}"
        event_selector = "li.event"
        name_selector = ".name"
        venue_selector = ".venue"
        date_selector = ".date"

        [platforms.seatgrab]
        base_url = "https://api.seatgrab.test"
        kind = "json_api"
        presale = true
        [platforms.seatgrab.api]
        search_path = "/search?q={query}"
        results_path = "/events"
        id_field = "/id"
        name_field = "/name"
        venue_field = "/venue"
        date_field = "/date"
        [platforms.seatgrab.rate_limit]
        requests = 10
        window_secs = 60

        [platforms.broken]
        enabled = "definitely"
    "#;

    #[test]
    fn test_lenient_platform_load() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.scrape.concurrency, 4);
        assert_eq!(settings.scrape.rate.base_delay_ms, 800);
        assert_eq!(settings.proxies.len(), 1);

        // Two good entries survive; the malformed one is skipped.
        assert_eq!(settings.platforms.len(), 2);
        assert!(settings.platforms.contains_key("ticketmax"));
        let seatgrab = &settings.platforms["seatgrab"];
        assert_eq!(seatgrab.kind, PlatformKind::JsonApi);
        assert!(seatgrab.presale);
        assert_eq!(seatgrab.rate_limit.unwrap().requests, 10);
    }

    #[test]
    fn test_defaults_without_file_sections() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.scrape.concurrency, 8);
        assert!(settings.platforms.is_empty());
        assert!(settings.proxies.is_empty());
        assert_eq!(settings.scrape.merge.name_similarity, 0.8);
    }

    #[test]
    fn test_pool_defaults() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.platforms["ticketmax"].pool(), "default");
    }
}
