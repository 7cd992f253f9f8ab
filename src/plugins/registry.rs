//! Plugin registry: discovery, enablement and per-plugin statistics.
//!
//! The registry owns one descriptor per configured platform. Plugin
//! instances are built lazily on first use; disabling a plugin is a soft
//! toggle that schedules no new calls but lets an in-flight scrape finish.
//!
//! Statistics counters are append-only increments, so they use atomics
//! rather than a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{PlatformEntry, PlatformKind, Settings};
use crate::models::{SearchCriteria, Session};
use crate::transport::HttpTransport;

use super::{Capabilities, DetectionSignal, JsonApiPlugin, ProfilePlugin, ScraperPlugin};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("invalid entry for platform '{platform}': {reason}")]
    InvalidEntry { platform: String, reason: String },
}

/// Identity and configuration of one registered plugin.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Registry name, also the platform key.
    pub name: String,
    pub capabilities: Capabilities,
    pub enabled: bool,
    pub entry: PlatformEntry,
}

#[derive(Debug, Default)]
struct PluginStats {
    calls: AtomicU64,
    successes: AtomicU64,
    detections: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time view of one plugin's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub detections: u64,
    pub avg_latency_ms: f64,
}

struct Registered {
    capabilities: Capabilities,
    entry: PlatformEntry,
    enabled: AtomicBool,
    instance: OnceLock<Arc<dyn ScraperPlugin>>,
    stats: PluginStats,
}

/// Registry of all configured scraper plugins.
pub struct PluginRegistry {
    plugins: HashMap<String, Registered>,
}

/// Capabilities derivable from configuration alone, so discovery does not
/// need to instantiate anything.
fn capabilities_of(entry: &PlatformEntry) -> Capabilities {
    match entry.kind {
        PlatformKind::Html => {
            let profile = entry.profile.as_ref();
            Capabilities {
                search: true,
                event_detail: false,
                availability: profile
                    .map(|p| p.availability_selector.is_some())
                    .unwrap_or(false),
                date_filter: false,
                city_filter: profile.map(|p| p.supports_city).unwrap_or(false),
            }
        }
        PlatformKind::JsonApi => {
            let api = entry.api.as_ref();
            Capabilities {
                search: true,
                event_detail: true,
                availability: api.map(|a| a.availability_field.is_some()).unwrap_or(false),
                date_filter: api.map(|a| a.supports_date_filter).unwrap_or(false),
                city_filter: api.map(|a| a.supports_city).unwrap_or(false),
            }
        }
    }
}

fn build_plugin(name: &str, entry: &PlatformEntry) -> Result<Arc<dyn ScraperPlugin>, RegistryError> {
    let queue_poll = entry
        .queue_poll_secs
        .map(std::time::Duration::from_secs);
    match entry.kind {
        PlatformKind::Html => {
            let profile = entry.profile.clone().ok_or_else(|| RegistryError::InvalidEntry {
                platform: name.to_string(),
                reason: "html platform without a selector profile".to_string(),
            })?;
            let mut plugin = ProfilePlugin::new(name, &entry.base_url, profile);
            if let Some(interval) = queue_poll {
                plugin = plugin.with_queue_poll(interval);
            }
            Ok(Arc::new(plugin))
        }
        PlatformKind::JsonApi => {
            let api = entry.api.clone().ok_or_else(|| RegistryError::InvalidEntry {
                platform: name.to_string(),
                reason: "json_api platform without an api profile".to_string(),
            })?;
            let mut plugin = JsonApiPlugin::new(name, &entry.base_url, api);
            if let Some(interval) = queue_poll {
                plugin = plugin.with_queue_poll(interval);
            }
            Ok(Arc::new(plugin))
        }
    }
}

impl PluginRegistry {
    /// Build the registry from settings.
    ///
    /// Entries that can never produce a working plugin are skipped with a
    /// warning; everything else is registered without instantiation.
    pub fn discover(settings: &Settings) -> Self {
        let mut plugins = HashMap::new();
        for (name, entry) in &settings.platforms {
            let usable = match entry.kind {
                PlatformKind::Html => entry.profile.is_some(),
                PlatformKind::JsonApi => entry.api.is_some(),
            };
            if !usable {
                warn!(
                    "skipping platform '{}': no profile for kind {:?}",
                    name, entry.kind
                );
                continue;
            }
            if url::Url::parse(&entry.base_url).is_err() {
                warn!(
                    "skipping platform '{}': invalid base url '{}'",
                    name, entry.base_url
                );
                continue;
            }
            plugins.insert(
                name.clone(),
                Registered {
                    capabilities: capabilities_of(entry),
                    entry: entry.clone(),
                    enabled: AtomicBool::new(entry.enabled),
                    instance: OnceLock::new(),
                    stats: PluginStats::default(),
                },
            );
        }
        debug!("registry discovered {} platforms", plugins.len());
        Self { plugins }
    }

    fn registered(&self, name: &str) -> Result<&Registered, RegistryError> {
        self.plugins
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPlugin(name.to_string()))
    }

    /// All registered platform keys, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptor for one plugin.
    pub fn get(&self, name: &str) -> Result<PluginDescriptor, RegistryError> {
        let reg = self.registered(name)?;
        Ok(PluginDescriptor {
            name: name.to_string(),
            capabilities: reg.capabilities,
            enabled: reg.enabled.load(Ordering::Relaxed),
            entry: reg.entry.clone(),
        })
    }

    /// Enable a plugin for new scrape rounds.
    pub fn enable(&self, name: &str) -> Result<(), RegistryError> {
        self.registered(name)?.enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Disable a plugin. In-flight scrapes finish; no new calls are
    /// scheduled.
    pub fn disable(&self, name: &str) -> Result<(), RegistryError> {
        self.registered(name)?.enabled.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins
            .get(name)
            .map(|r| r.enabled.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// The plugin instance, built on first use.
    pub fn plugin(&self, name: &str) -> Result<Arc<dyn ScraperPlugin>, RegistryError> {
        let reg = self.registered(name)?;
        if let Some(instance) = reg.instance.get() {
            return Ok(instance.clone());
        }
        let built = build_plugin(name, &reg.entry)?;
        let _ = reg.instance.set(built.clone());
        Ok(reg.instance.get().cloned().unwrap_or(built))
    }

    /// Enabled plugins able to serve a search, paired with their names.
    ///
    /// Capability matching here is a prefilter; `build_request` still
    /// rejects criteria that exceed a plugin's declared abilities.
    pub fn enabled_matching(
        &self,
        criteria: &SearchCriteria,
    ) -> Vec<(String, Arc<dyn ScraperPlugin>)> {
        let mut matching = Vec::new();
        for name in self.names() {
            let Ok(reg) = self.registered(&name) else {
                continue;
            };
            if !reg.enabled.load(Ordering::Relaxed) || !reg.capabilities.search {
                continue;
            }
            if criteria.city.is_some() && !reg.capabilities.city_filter {
                continue;
            }
            if criteria.has_date_filter() && !reg.capabilities.date_filter {
                continue;
            }
            match self.plugin(&name) {
                Ok(instance) => matching.push((name, instance)),
                Err(e) => warn!("cannot instantiate plugin '{}': {}", name, e),
            }
        }
        matching
    }

    /// Record one gated call against a plugin's counters.
    pub fn record_call(&self, name: &str, latency_ms: u64, success: bool, detected: bool) {
        if let Some(reg) = self.plugins.get(name) {
            reg.stats.calls.fetch_add(1, Ordering::Relaxed);
            reg.stats
                .total_latency_ms
                .fetch_add(latency_ms, Ordering::Relaxed);
            if success {
                reg.stats.successes.fetch_add(1, Ordering::Relaxed);
            }
            if detected {
                reg.stats.detections.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Accumulated counters for one plugin.
    pub fn stats(&self, name: &str) -> Result<StatsSnapshot, RegistryError> {
        let reg = self.registered(name)?;
        let calls = reg.stats.calls.load(Ordering::Relaxed);
        let total_latency = reg.stats.total_latency_ms.load(Ordering::Relaxed);
        Ok(StatsSnapshot {
            calls,
            successes: reg.stats.successes.load(Ordering::Relaxed),
            detections: reg.stats.detections.load(Ordering::Relaxed),
            avg_latency_ms: if calls == 0 {
                0.0
            } else {
                total_latency as f64 / calls as f64
            },
        })
    }

    /// Reset one plugin's counters. Counters never reset implicitly.
    pub fn reset_stats(&self, name: &str) -> Result<(), RegistryError> {
        let reg = self.registered(name)?;
        reg.stats.calls.store(0, Ordering::Relaxed);
        reg.stats.successes.store(0, Ordering::Relaxed);
        reg.stats.detections.store(0, Ordering::Relaxed);
        reg.stats.total_latency_ms.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Historical success ratio used for merge tie-breaking. Plugins with
    /// no history sit at 0.5.
    pub fn reliability(&self, name: &str) -> f64 {
        match self.stats(name) {
            Ok(stats) if stats.calls > 0 => stats.successes as f64 / stats.calls as f64,
            _ => 0.5,
        }
    }

    /// Reliability for every registered plugin.
    pub fn reliability_map(&self) -> HashMap<String, f64> {
        self.names()
            .into_iter()
            .map(|name| {
                let score = self.reliability(&name);
                (name, score)
            })
            .collect()
    }

    /// Probe one plugin against the live platform.
    ///
    /// The plugin supplies the request spec and judges the response; the
    /// transport performs the only I/O. Healthy means the probe came back
    /// without a blocking signal.
    pub async fn self_test(
        &self,
        name: &str,
        transport: &dyn HttpTransport,
        session: &Session,
    ) -> Result<bool, RegistryError> {
        let plugin = self.plugin(name)?;
        let spec = plugin.probe_request();
        match transport.execute(&spec, session).await {
            Ok(response) => {
                let outcome = plugin.parse_response(&response);
                let healthy = !matches!(
                    outcome.detection,
                    Some(DetectionSignal::Blocked)
                        | Some(DetectionSignal::Challenged)
                        | Some(DetectionSignal::Throttled)
                );
                Ok(healthy)
            }
            Err(e) => {
                debug!("self test transport failure for {}: {}", name, e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn settings() -> Settings {
        Settings::from_toml(
            r#"
            [platforms.ticketmax]
            base_url = "https://ticketmax.test"
            [platforms.ticketmax.profile]
            search_path = "/search?q={query}"
            event_selector = "li.event"
            name_selector = ".name"
            venue_selector = ".venue"
            date_selector = ".date"

            [platforms.disabledsite]
            base_url = "https://disabled.test"
            enabled = false
            [platforms.disabledsite.profile]
            search_path = "/s?q={query}"
            event_selector = "div.row"
            name_selector = ".n"
            venue_selector = ".v"
            date_selector = ".d"

            [platforms.nohtmlprofile]
            base_url = "https://broken.test"

            [platforms.badurl]
            base_url = "not a url"
            [platforms.badurl.profile]
            search_path = "/s?q={query}"
            event_selector = "div.row"
            name_selector = ".n"
            venue_selector = ".v"
            date_selector = ".d"
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_discover_skips_unusable_entries() {
        let registry = PluginRegistry::discover(&settings());
        assert_eq!(registry.names(), vec!["disabledsite", "ticketmax"]);
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::discover(&settings());
        assert!(matches!(
            registry.get("nope"),
            Err(RegistryError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_enable_disable_toggles_dispatch() {
        let registry = PluginRegistry::discover(&settings());
        let criteria = SearchCriteria::for_query("team x");

        let names: Vec<String> = registry
            .enabled_matching(&criteria)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["ticketmax"]);

        registry.enable("disabledsite").unwrap();
        registry.disable("ticketmax").unwrap();
        let names: Vec<String> = registry
            .enabled_matching(&criteria)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["disabledsite"]);
    }

    #[test]
    fn test_stats_accumulate_and_reset() {
        let registry = PluginRegistry::discover(&settings());
        registry.record_call("ticketmax", 100, true, false);
        registry.record_call("ticketmax", 300, false, true);

        let stats = registry.stats("ticketmax").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.detections, 1);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((registry.reliability("ticketmax") - 0.5).abs() < f64::EPSILON);

        registry.reset_stats("ticketmax").unwrap();
        assert_eq!(registry.stats("ticketmax").unwrap().calls, 0);
    }

    #[test]
    fn test_reliability_defaults_without_history() {
        let registry = PluginRegistry::discover(&settings());
        assert!((registry.reliability("ticketmax") - 0.5).abs() < f64::EPSILON);
    }
}
