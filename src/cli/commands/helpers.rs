//! Shared command helpers: settings loading and component wiring.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Settings;
use crate::demand::HighDemandPrioritizer;
use crate::identity::{FingerprintProvider, ProxyRotator};
use crate::merge::ResultMerger;
use crate::orchestrator::ScrapeOrchestrator;
use crate::plugins::PluginRegistry;
use crate::queue_nav::QueueNavigator;
use crate::rate_limit::{
    load_rate_limit_state, RateLimitConfig, RateLimiter, RateOverride,
};
use crate::transport::ReqwestTransport;

/// Load settings from the resolved config path, or fall back to defaults
/// when no file exists.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    match Settings::resolve_path(explicit) {
        Some(path) => {
            info!("loading config from {}", path.display());
            Settings::load(&path)
        }
        None => {
            warn!("no config file found, using defaults (no platforms registered)");
            Ok(Settings::default())
        }
    }
}

/// The wired-up scraping stack.
pub struct Stack {
    pub registry: Arc<PluginRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub fingerprints: Arc<FingerprintProvider>,
    pub orchestrator: ScrapeOrchestrator,
}

/// Build every component from settings and wire the orchestrator.
pub async fn build_stack(settings: Settings) -> anyhow::Result<Stack> {
    let rate = &settings.scrape.rate;
    let rate_config = RateLimitConfig {
        base_delay: Duration::from_millis(rate.base_delay_ms),
        min_delay: Duration::from_millis(rate.min_delay_ms),
        max_delay: Duration::from_millis(rate.max_delay_ms),
        backoff_multiplier: rate.backoff_multiplier,
        block_cooldown: Duration::from_secs(rate.block_cooldown_secs),
        recovery_threshold: rate.recovery_threshold,
        ..Default::default()
    };

    let mut overrides = HashMap::new();
    for (name, entry) in &settings.platforms {
        if let Some(limit) = entry.rate_limit {
            overrides.insert(
                name.clone(),
                RateOverride {
                    requests_per_window: limit.requests,
                    window: Duration::from_secs(limit.window_secs),
                },
            );
        }
    }
    let limiter = Arc::new(RateLimiter::with_config(rate_config).with_overrides(overrides));

    if let Some(db_path) = settings.state_db_path() {
        match load_rate_limit_state(&limiter, &db_path).await {
            Ok(count) if count > 0 => info!("restored backoff state for {} platforms", count),
            Ok(_) => {}
            Err(e) => warn!("cannot restore rate limit state: {}", e),
        }
    }

    let rotator = Arc::new(ProxyRotator::new(Duration::from_secs(
        rate.proxy_cooldown_secs,
    )));
    for proxy in &settings.proxies {
        rotator.register(&proxy.url, &proxy.pools).await;
    }

    let fingerprints = Arc::new(FingerprintProvider::new(
        (settings.scrape.jitter_min_ms, settings.scrape.jitter_max_ms),
        settings.scrape.session_max_requests,
        settings.session_max_age(),
    ));

    let navigator = Arc::new(QueueNavigator::new((&settings.scrape.queue).into()));
    let prioritizer = HighDemandPrioritizer::new(
        settings.scrape.demand.clone(),
        settings.scrape.concurrency,
    );
    let merger = ResultMerger::new((&settings.scrape.merge).into());
    let registry = Arc::new(PluginRegistry::discover(&settings));
    let transport = Arc::new(ReqwestTransport::default());

    let orchestrator = ScrapeOrchestrator::new(
        registry.clone(),
        limiter.clone(),
        rotator.clone(),
        fingerprints.clone(),
        navigator,
        prioritizer,
        merger,
        transport,
        settings.scrape.concurrency,
        settings.deadline(),
    );

    Ok(Stack {
        registry,
        limiter,
        fingerprints,
        orchestrator,
    })
}
