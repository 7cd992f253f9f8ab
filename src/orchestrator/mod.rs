//! Top-level scrape coordination.
//!
//! The orchestrator fans a search out across all enabled, capable plugins
//! concurrently, gates every call through the rate limiter and a fresh
//! session, hands queue pages to the navigator, and merges the collected
//! candidates once all platform tasks settle. One platform's failure never
//! aborts the others; the round always returns whatever succeeded plus a
//! per-platform status report.

mod report;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::PlatformEntry;
use crate::demand::HighDemandPrioritizer;
use crate::identity::{FingerprintProvider, ProxyError, ProxyRecord, ProxyRotator};
use crate::merge::ResultMerger;
use crate::models::{DemandLevel, ScrapeCandidate, ScrapeStrategy, SearchCriteria, Session};
use crate::plugins::{DetectionSignal, PluginRegistry, RegistryError, ScraperPlugin, StatsSnapshot};
use crate::queue_nav::{QueueNavigator, QueueOutcome};
use crate::rate_limit::{Outcome, RateLimiter};
use crate::transport::HttpTransport;

pub use report::{PlatformOutcome, PlatformReport, ScrapeReport};

/// Everything one platform task needs, cloned into its spawned future.
#[derive(Clone)]
struct PlatformContext {
    platform: String,
    plugin: Arc<dyn ScraperPlugin>,
    entry: PlatformEntry,
    registry: Arc<PluginRegistry>,
    limiter: Arc<RateLimiter>,
    rotator: Arc<ProxyRotator>,
    fingerprints: Arc<FingerprintProvider>,
    navigator: Arc<QueueNavigator>,
    transport: Arc<dyn HttpTransport>,
}

/// Coordinates concurrent platform scrapes into one merged round.
pub struct ScrapeOrchestrator {
    registry: Arc<PluginRegistry>,
    limiter: Arc<RateLimiter>,
    rotator: Arc<ProxyRotator>,
    fingerprints: Arc<FingerprintProvider>,
    navigator: Arc<QueueNavigator>,
    prioritizer: HighDemandPrioritizer,
    merger: ResultMerger,
    transport: Arc<dyn HttpTransport>,
    /// Global ceiling on concurrent platform tasks.
    concurrency: usize,
    /// Deadline for one scrape round.
    deadline: Duration,
}

impl ScrapeOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PluginRegistry>,
        limiter: Arc<RateLimiter>,
        rotator: Arc<ProxyRotator>,
        fingerprints: Arc<FingerprintProvider>,
        navigator: Arc<QueueNavigator>,
        prioritizer: HighDemandPrioritizer,
        merger: ResultMerger,
        transport: Arc<dyn HttpTransport>,
        concurrency: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            registry,
            limiter,
            rotator,
            fingerprints,
            navigator,
            prioritizer,
            merger,
            transport,
            concurrency: concurrency.max(1),
            deadline,
        }
    }

    /// Scrape every enabled, capability-matching platform and merge the
    /// results.
    pub async fn scrape_all(&self, criteria: &SearchCriteria) -> ScrapeReport {
        let plugins = self.registry.enabled_matching(criteria);
        self.run_round(plugins, criteria).await
    }

    /// Single-platform variant with identical gating, for targeted
    /// re-checks.
    pub async fn scrape_platform(
        &self,
        name: &str,
        criteria: &SearchCriteria,
    ) -> Result<ScrapeReport, RegistryError> {
        let plugin = self.registry.plugin(name)?;
        Ok(self
            .run_round(vec![(name.to_string(), plugin)], criteria)
            .await)
    }

    async fn run_round(
        &self,
        plugins: Vec<(String, Arc<dyn ScraperPlugin>)>,
        criteria: &SearchCriteria,
    ) -> ScrapeReport {
        let round_start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(PlatformReport, Vec<ScrapeCandidate>)> = JoinSet::new();

        for (name, plugin) in plugins {
            let Ok(descriptor) = self.registry.get(&name) else {
                continue;
            };
            let stats = self.registry.stats(&name).unwrap_or(StatsSnapshot {
                calls: 0,
                successes: 0,
                detections: 0,
                avg_latency_ms: 0.0,
            });
            let demand = self.prioritizer.classify(&descriptor.entry, criteria, &stats);
            let strategy = self.prioritizer.select_strategy(demand);

            let ctx = PlatformContext {
                platform: name,
                plugin,
                entry: descriptor.entry,
                registry: self.registry.clone(),
                limiter: self.limiter.clone(),
                rotator: self.rotator.clone(),
                fingerprints: self.fingerprints.clone(),
                navigator: self.navigator.clone(),
                transport: self.transport.clone(),
            };
            let criteria = criteria.clone();
            let semaphore = semaphore.clone();
            let deadline = self.deadline;

            tasks.spawn(async move {
                // Permit errors only happen on a closed semaphore, which
                // cannot outlive this round.
                let _permit = semaphore.acquire_owned().await;
                let remaining = deadline.saturating_sub(round_start.elapsed());
                run_platform(ctx, criteria, demand, strategy, remaining).await
            });
        }

        let mut all_candidates = Vec::new();
        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((report, candidates)) => {
                    all_candidates.extend(candidates);
                    reports.push(report);
                }
                Err(e) => warn!("platform task panicked: {}", e),
            }
        }
        reports.sort_by(|a, b| a.platform.cmp(&b.platform));

        let reliability = self.registry.reliability_map();
        let records = self.merger.merge(all_candidates, &reliability);

        ScrapeReport {
            records,
            platforms: reports,
            elapsed: round_start.elapsed(),
        }
    }
}

/// Run one platform's scrape under its share of the round deadline.
async fn run_platform(
    ctx: PlatformContext,
    criteria: SearchCriteria,
    demand: DemandLevel,
    strategy: ScrapeStrategy,
    deadline: Duration,
) -> (PlatformReport, Vec<ScrapeCandidate>) {
    let poll_again = strategy.poll_interval_hint;
    let report = |outcome: PlatformOutcome, candidates: usize, latency: Option<u64>| PlatformReport {
        platform: ctx.platform.clone(),
        outcome,
        candidates,
        latency_ms: latency,
        demand,
        poll_again,
    };

    // A platform paused after a block gets no new calls until the cooldown
    // passes.
    if let Some(pause) = ctx.limiter.pause_remaining(&ctx.platform).await {
        debug!("platform {} paused for {:?}, skipping", ctx.platform, pause);
        return (report(PlatformOutcome::Blocked, 0, None), Vec::new());
    }

    let collected: Arc<StdMutex<Vec<ScrapeCandidate>>> = Arc::new(StdMutex::new(Vec::new()));
    let checked_out: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

    let attempts = strategy.session_prewarm_count.max(1);
    let work = {
        let ctx = ctx.clone();
        let criteria = criteria.clone();
        let collected = collected.clone();
        let checked_out = checked_out.clone();
        async move {
            if attempts == 1 {
                vec![
                    attempt(
                        &ctx,
                        &criteria,
                        strategy.auto_queue_bypass,
                        &collected,
                        &checked_out,
                    )
                    .await,
                ]
            } else {
                let mut inner: JoinSet<(PlatformOutcome, Option<u64>)> = JoinSet::new();
                for _ in 0..attempts {
                    let ctx = ctx.clone();
                    let criteria = criteria.clone();
                    let collected = collected.clone();
                    let checked_out = checked_out.clone();
                    let bypass = strategy.auto_queue_bypass;
                    inner.spawn(async move {
                        attempt(&ctx, &criteria, bypass, &collected, &checked_out).await
                    });
                }
                let mut outcomes = Vec::new();
                while let Some(joined) = inner.join_next().await {
                    if let Ok(outcome) = joined {
                        outcomes.push(outcome);
                    }
                }
                outcomes
            }
        }
    };

    match tokio::time::timeout(deadline, work).await {
        Ok(outcomes) => {
            let candidates = match collected.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            let (outcome, latency) = aggregate_outcomes(outcomes, !candidates.is_empty());
            (report(outcome, candidates.len(), latency), candidates)
        }
        Err(_) => {
            // Deadline fired mid-wait. Keep partial results, return held
            // proxies to the pool immediately, mark the platform timed out
            // rather than failed.
            let addresses: Vec<String> = match checked_out.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            for address in addresses {
                ctx.rotator.release(&address).await;
            }
            let candidates = match collected.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            debug!(
                "platform {} timed out with {} partial candidates",
                ctx.platform,
                candidates.len()
            );
            (
                report(PlatformOutcome::TimedOut, candidates.len(), None),
                candidates,
            )
        }
    }
}

/// Collapse prewarmed-session outcomes into one platform outcome.
fn aggregate_outcomes(
    outcomes: Vec<(PlatformOutcome, Option<u64>)>,
    has_candidates: bool,
) -> (PlatformOutcome, Option<u64>) {
    if outcomes.is_empty() {
        return (
            PlatformOutcome::Failed {
                error: "no session attempt completed".to_string(),
            },
            None,
        );
    }
    let pick = if has_candidates {
        // Something worked; report the most successful attempt.
        outcomes
            .into_iter()
            .min_by_key(|(o, _)| o.severity())
    } else {
        // Nothing worked; report the strongest signal.
        outcomes
            .into_iter()
            .max_by_key(|(o, _)| o.severity())
    };
    pick.unwrap_or((
        PlatformOutcome::Failed {
            error: "no session attempt completed".to_string(),
        },
        None,
    ))
}

/// Check out a proxy for a session, retrying once after the shortest
/// cooldown if the pool is momentarily exhausted.
async fn acquire_proxy(
    ctx: &PlatformContext,
    pool: &str,
) -> Result<Option<ProxyRecord>, PlatformOutcome> {
    if ctx.rotator.is_empty().await {
        // No proxies configured at all: direct connections.
        return Ok(None);
    }
    match ctx.rotator.next_proxy(pool).await {
        Ok(proxy) => Ok(Some(proxy)),
        Err(ProxyError::UnknownPool(_)) => Ok(None),
        Err(ProxyError::NoHealthyProxy(_)) => {
            let Some(wait) = ctx.rotator.shortest_cooldown(pool).await else {
                return Err(PlatformOutcome::NoHealthyProxy);
            };
            debug!(
                "proxy pool '{}' exhausted, retrying after {:?}",
                pool, wait
            );
            tokio::time::sleep(wait + Duration::from_millis(10)).await;
            match ctx.rotator.next_proxy(pool).await {
                Ok(proxy) => Ok(Some(proxy)),
                Err(_) => Err(PlatformOutcome::NoHealthyProxy),
            }
        }
    }
}

/// Return the session's proxy to the pool and drop it from the
/// cancellation ledger.
async fn release_session(
    ctx: &PlatformContext,
    session: &Session,
    checked_out: &Arc<StdMutex<Vec<String>>>,
) {
    if let Some(address) = session.proxy_address() {
        ctx.rotator.release(address).await;
        if let Ok(mut guard) = checked_out.lock() {
            guard.retain(|a| a != address);
        }
    }
}

/// One gated request with a fresh session.
async fn attempt(
    ctx: &PlatformContext,
    criteria: &SearchCriteria,
    auto_bypass: bool,
    collected: &Arc<StdMutex<Vec<ScrapeCandidate>>>,
    checked_out: &Arc<StdMutex<Vec<String>>>,
) -> (PlatformOutcome, Option<u64>) {
    // Admission first: even prewarmed sessions pass through the same
    // serialized decision point.
    ctx.limiter.admit(&ctx.platform).await;

    let proxy = match acquire_proxy(ctx, ctx.entry.pool()).await {
        Ok(proxy) => proxy,
        Err(outcome) => return (outcome, None),
    };
    if let Some(proxy) = &proxy {
        if let Ok(mut guard) = checked_out.lock() {
            guard.push(proxy.address.clone());
        }
    }
    let mut session = ctx.fingerprints.new_session(&ctx.platform, proxy);

    let spec = match ctx.plugin.build_request(criteria) {
        Ok(spec) => spec,
        Err(e) => {
            release_session(ctx, &session, checked_out).await;
            return (
                PlatformOutcome::Skipped {
                    reason: e.to_string(),
                },
                None,
            );
        }
    };

    // Human pacing within the session.
    tokio::time::sleep(session.human_delay()).await;
    session.note_request();

    let started = Instant::now();
    let response = match ctx.transport.execute(&spec, &session).await {
        Ok(response) => response,
        Err(e) => {
            if let Some(address) = session.proxy_address() {
                ctx.rotator.report_outcome(address, false).await;
            }
            release_session(ctx, &session, checked_out).await;
            ctx.registry
                .record_call(&ctx.platform, started.elapsed().as_millis() as u64, false, false);
            return (
                PlatformOutcome::Failed {
                    error: e.to_string(),
                },
                None,
            );
        }
    };
    let latency = started.elapsed().as_millis() as u64;
    if let Some(address) = session.proxy_address() {
        ctx.rotator.report_outcome(address, true).await;
    }

    // Queue interception before parsing: a waiting room is neither content
    // nor a block.
    let final_response = if ctx.navigator.detect(ctx.plugin.as_ref(), &response) {
        let waited = ctx
            .navigator
            .wait_out(
                ctx.plugin.as_ref(),
                &spec,
                &mut session,
                ctx.transport.as_ref(),
                &ctx.limiter,
                &response,
                auto_bypass,
            )
            .await;
        match waited {
            Ok(QueueOutcome::Released { response, .. }) => response,
            Ok(QueueOutcome::Abandoned { .. }) => {
                release_session(ctx, &session, checked_out).await;
                ctx.registry.record_call(&ctx.platform, latency, false, true);
                return (PlatformOutcome::QueueAbandoned, Some(latency));
            }
            Err(e) => {
                release_session(ctx, &session, checked_out).await;
                ctx.registry.record_call(&ctx.platform, latency, false, false);
                return (
                    PlatformOutcome::Failed {
                        error: e.to_string(),
                    },
                    Some(latency),
                );
            }
        }
    } else {
        response
    };

    let mut parsed = ctx.plugin.parse_response(&final_response);
    if let Some(max) = criteria.max_results {
        parsed.candidates.truncate(max);
    }
    let candidate_count = parsed.candidates.len();

    let (outcome, limiter_outcome, success, detected) = match parsed.detection {
        None => {
            let outcome = if candidate_count == 0 {
                PlatformOutcome::NoResults
            } else {
                PlatformOutcome::Ok
            };
            (outcome, Some(Outcome::Success), true, false)
        }
        // A content issue: no backoff, the fetch itself worked.
        Some(DetectionSignal::ParseDegraded) => (
            PlatformOutcome::ParseDegraded,
            Some(Outcome::Success),
            false,
            false,
        ),
        Some(DetectionSignal::Throttled) => (
            PlatformOutcome::Throttled,
            Some(Outcome::Throttled),
            false,
            true,
        ),
        Some(DetectionSignal::Blocked) => (
            PlatformOutcome::Blocked,
            Some(Outcome::Blocked),
            false,
            true,
        ),
        Some(DetectionSignal::Challenged) => (
            PlatformOutcome::Challenged,
            Some(Outcome::Blocked),
            false,
            true,
        ),
        // The plugin recognized a waiting room that the navigator's
        // detection missed; without a full traversal this attempt ends as
        // an abandoned wait.
        Some(DetectionSignal::QueuePage) => {
            (PlatformOutcome::QueueAbandoned, None, false, true)
        }
    };

    if !parsed.candidates.is_empty() {
        if let Ok(mut guard) = collected.lock() {
            guard.extend(parsed.candidates);
        }
    }

    release_session(ctx, &session, checked_out).await;
    ctx.registry
        .record_call(&ctx.platform, latency, success, detected);
    if let Some(limiter_outcome) = limiter_outcome {
        ctx.limiter
            .report_outcome(&ctx.platform, limiter_outcome)
            .await;
    }

    (outcome, Some(latency))
}
