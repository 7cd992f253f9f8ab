//! End-to-end scrape rounds against stubbed platforms.
//!
//! These tests drive the full stack (registry, limiter, rotator,
//! fingerprints, navigator, merger, orchestrator) with a stub transport, so
//! every network interaction is scripted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ticketscout::config::Settings;
use ticketscout::demand::HighDemandPrioritizer;
use ticketscout::identity::{FingerprintProvider, ProxyRotator};
use ticketscout::merge::ResultMerger;
use ticketscout::models::{SearchCriteria, Session};
use ticketscout::orchestrator::{PlatformOutcome, ScrapeOrchestrator};
use ticketscout::plugins::{HttpRequestSpec, PluginRegistry, RawResponse};
use ticketscout::queue_nav::{QueueNavigator, QueueNavigatorConfig};
use ticketscout::rate_limit::{RateLimitConfig, RateLimiter};
use ticketscout::transport::{HttpTransport, TransportError};

/// One scripted response: matched by URL substring.
struct StubRoute {
    needle: &'static str,
    delay: Duration,
    status: u16,
    body: String,
}

/// Transport that serves scripted responses and counts calls.
struct StubTransport {
    routes: Vec<StubRoute>,
    calls: AtomicUsize,
}

impl StubTransport {
    fn new(routes: Vec<StubRoute>) -> Self {
        Self {
            routes,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn execute(
        &self,
        spec: &HttpRequestSpec,
        _session: &Session,
    ) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = self
            .routes
            .iter()
            .find(|r| spec.url.contains(r.needle))
            .ok_or_else(|| TransportError::Http(format!("no stub route for {}", spec.url)))?;
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        Ok(RawResponse {
            status: route.status,
            final_url: spec.url.clone(),
            headers: Default::default(),
            body: route.body.clone(),
            elapsed: route.delay,
        })
    }
}

fn listing_html(price: &str) -> String {
    format!(
        r#"<html><body><ul>
            <li class="event" data-id="ev-1">
              <span class="name">Team X vs Team Y</span>
              <span class="venue">Stadium Z</span>
              <span class="date">2025-05-01 19:30</span>
              <span class="price">{}</span>
            </li>
        </ul></body></html>"#,
        price
    )
}

fn seatgrab_json(price: f64) -> String {
    format!(
        r#"{{"events": [{{
            "id": 7001,
            "name": "Team Y vs Team X",
            "venue": "The Stadium Z",
            "date": "2025-05-01T20:00:00",
            "price": {},
            "currency": "USD"
        }}]}}"#,
        price
    )
}

const BASE_SETTINGS: &str = r#"
    [scrape]
    concurrency = 4
    deadline_secs = 10
    jitter_min_ms = 0
    jitter_max_ms = 0

    [platforms.ticketmax]
    base_url = "https://ticketmax.test"
    [platforms.ticketmax.profile]
    search_path = "/search?q={query}"
    event_selector = "li.event"
    name_selector = ".name"
    venue_selector = ".venue"
    date_selector = ".date"
    price_selector = ".price"

    [platforms.seatgrab]
    base_url = "https://api.seatgrab.test"
    kind = "json_api"
    [platforms.seatgrab.api]
    search_path = "/v2/search?q={query}"
    results_path = "/events"
    id_field = "/id"
    name_field = "/name"
    venue_field = "/venue"
    date_field = "/date"
    price_field = "/price"
    currency_field = "/currency"
"#;

struct TestStack {
    registry: Arc<PluginRegistry>,
    rotator: Arc<ProxyRotator>,
    orchestrator: ScrapeOrchestrator,
}

fn build_stack(
    settings_toml: &str,
    transport: Arc<dyn HttpTransport>,
    queue_config: QueueNavigatorConfig,
    deadline: Duration,
    proxy_cooldown: Duration,
) -> TestStack {
    let settings = Settings::from_toml(settings_toml).expect("test settings parse");
    let registry = Arc::new(PluginRegistry::discover(&settings));
    let limiter = Arc::new(RateLimiter::with_config(RateLimitConfig {
        base_delay: Duration::from_millis(2),
        min_delay: Duration::from_millis(1),
        block_cooldown: Duration::from_millis(200),
        ..Default::default()
    }));
    let rotator = Arc::new(ProxyRotator::new(proxy_cooldown));
    let fingerprints = Arc::new(FingerprintProvider::new((0, 0), 50, Duration::from_secs(60)));
    let navigator = Arc::new(QueueNavigator::new(queue_config));
    let prioritizer = HighDemandPrioritizer::new(settings.scrape.demand.clone(), 4);
    let merger = ResultMerger::new((&settings.scrape.merge).into());

    let orchestrator = ScrapeOrchestrator::new(
        registry.clone(),
        limiter,
        rotator.clone(),
        fingerprints,
        navigator,
        prioritizer,
        merger,
        transport,
        4,
        deadline,
    );
    TestStack {
        registry,
        rotator,
        orchestrator,
    }
}

fn default_queue_config() -> QueueNavigatorConfig {
    QueueNavigatorConfig {
        max_wait: Duration::from_secs(2),
        default_poll_interval: Duration::from_millis(20),
        max_bypass_attempts: 0,
    }
}

#[tokio::test]
async fn scenario_a_two_platforms_merge_with_tiebreak() {
    let transport = Arc::new(StubTransport::new(vec![
        StubRoute {
            needle: "ticketmax.test",
            delay: Duration::ZERO,
            status: 200,
            body: listing_html("$50.00"),
        },
        StubRoute {
            needle: "seatgrab.test",
            delay: Duration::ZERO,
            status: 200,
            body: seatgrab_json(55.0),
        },
    ]));
    let stack = build_stack(
        BASE_SETTINGS,
        transport,
        default_queue_config(),
        Duration::from_secs(10),
        Duration::from_millis(100),
    );

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    // Both platforms succeeded and describe the same real event.
    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.sources.len(), 2);
    assert_eq!(record.distinct_platforms(), 2);

    // Confidence beats the single-source baseline of 0.5.
    assert!(record.confidence > 0.5, "confidence {}", record.confidence);

    // Price follows the most recently observed contributor.
    let latest = record
        .sources
        .iter()
        .max_by_key(|s| s.observed_at)
        .expect("record has sources");
    let expected_price = match latest.platform.as_str() {
        "ticketmax" => 5000,
        "seatgrab" => 5500,
        other => panic!("unexpected platform {}", other),
    };
    assert_eq!(record.price.as_ref().unwrap().amount_minor, expected_price);

    assert_eq!(
        report.platform("ticketmax").unwrap().outcome,
        PlatformOutcome::Ok
    );
    assert_eq!(
        report.platform("seatgrab").unwrap().outcome,
        PlatformOutcome::Ok
    );
}

#[tokio::test]
async fn scenario_b_blocked_platform_is_contained() {
    let settings = format!(
        "{}\n{}",
        BASE_SETTINGS,
        r#"
        [platforms.blockedsite]
        base_url = "https://blockedsite.test"
        [platforms.blockedsite.profile]
        search_path = "/s?q={query}"
        event_selector = "li.event"
        name_selector = ".name"
        venue_selector = ".venue"
        date_selector = ".date"
    "#
    );
    let transport = Arc::new(StubTransport::new(vec![
        StubRoute {
            needle: "ticketmax.test",
            delay: Duration::ZERO,
            status: 200,
            body: listing_html("$50.00"),
        },
        StubRoute {
            needle: "seatgrab.test",
            delay: Duration::ZERO,
            status: 200,
            body: seatgrab_json(55.0),
        },
        StubRoute {
            needle: "blockedsite.test",
            delay: Duration::ZERO,
            status: 403,
            body: "access denied".to_string(),
        },
    ]));
    let stack = build_stack(
        &settings,
        transport,
        default_queue_config(),
        Duration::from_secs(10),
        Duration::from_millis(100),
    );

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    // The blocked platform is reported, not absent, and the others merged.
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.platform("blockedsite").unwrap().outcome,
        PlatformOutcome::Blocked
    );
    assert_eq!(report.platform("blockedsite").unwrap().candidates, 0);
    assert_eq!(report.platforms.len(), 3);
}

#[tokio::test]
async fn scenario_c_proxy_exhaustion_retries_after_cooldown() {
    let settings = r#"
        [scrape]
        jitter_min_ms = 0
        jitter_max_ms = 0

        [platforms.proxysite]
        base_url = "https://proxysite.test"
        [platforms.proxysite.profile]
        search_path = "/search?q={query}"
        event_selector = "li.event"
        name_selector = ".name"
        venue_selector = ".venue"
        date_selector = ".date"
        price_selector = ".price"
    "#;
    let transport = Arc::new(StubTransport::new(vec![StubRoute {
        needle: "proxysite.test",
        delay: Duration::ZERO,
        status: 200,
        body: listing_html("$42.00"),
    }]));
    let stack = build_stack(
        settings,
        transport.clone(),
        default_queue_config(),
        Duration::from_secs(10),
        Duration::from_millis(150),
    );

    // The only proxy is pushed into cooldown before the round starts.
    stack
        .rotator
        .register("http://only:8080", &["default".to_string()])
        .await;
    for _ in 0..3 {
        stack.rotator.report_outcome("http://only:8080", false).await;
    }
    assert_eq!(stack.rotator.available_count("default").await, 0);

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    // The orchestrator waited out the shortest cooldown, retried once and
    // succeeded.
    let platform = report.platform("proxysite").unwrap();
    assert_eq!(platform.outcome, PlatformOutcome::Ok);
    assert_eq!(report.records.len(), 1);
    assert_eq!(transport.calls(), 1);

    // The proxy went back to the pool after the session ended.
    assert_eq!(stack.rotator.available_count("default").await, 1);
}

#[tokio::test]
async fn queue_abandonment_releases_proxy_and_reports_cleanly() {
    let settings = r#"
        [scrape]
        jitter_min_ms = 0
        jitter_max_ms = 0

        [platforms.queuesite]
        base_url = "https://queuesite.test"
        [platforms.queuesite.profile]
        search_path = "/search?q={query}"
        event_selector = "li.event"
        name_selector = ".name"
        venue_selector = ".venue"
        date_selector = ".date"
        queue_markers = ["waiting room"]
    "#;
    let transport = Arc::new(StubTransport::new(vec![StubRoute {
        needle: "queuesite.test",
        delay: Duration::ZERO,
        status: 200,
        body: "<html>waiting room, position in line: 4821</html>".to_string(),
    }]));
    let stack = build_stack(
        settings,
        transport,
        QueueNavigatorConfig {
            max_wait: Duration::from_millis(100),
            default_poll_interval: Duration::from_millis(25),
            max_bypass_attempts: 0,
        },
        Duration::from_secs(10),
        Duration::from_millis(100),
    );
    stack
        .rotator
        .register("http://q:8080", &["default".to_string()])
        .await;

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    // Abandonment is a reported outcome, not an error, and the session's
    // proxy is back in the pool.
    assert_eq!(
        report.platform("queuesite").unwrap().outcome,
        PlatformOutcome::QueueAbandoned
    );
    assert!(report.records.is_empty());
    assert_eq!(stack.rotator.available_count("default").await, 1);
}

#[tokio::test]
async fn deadline_marks_platform_timed_out_and_keeps_others() {
    let settings = format!(
        "{}\n{}",
        BASE_SETTINGS,
        r#"
        [platforms.slowsite]
        base_url = "https://slowsite.test"
        [platforms.slowsite.profile]
        search_path = "/search?q={query}"
        event_selector = "li.event"
        name_selector = ".name"
        venue_selector = ".venue"
        date_selector = ".date"
    "#
    );
    let transport = Arc::new(StubTransport::new(vec![
        StubRoute {
            needle: "ticketmax.test",
            delay: Duration::ZERO,
            status: 200,
            body: listing_html("$50.00"),
        },
        StubRoute {
            needle: "seatgrab.test",
            delay: Duration::ZERO,
            status: 200,
            body: seatgrab_json(55.0),
        },
        StubRoute {
            needle: "slowsite.test",
            delay: Duration::from_secs(5),
            status: 200,
            body: listing_html("$10.00"),
        },
    ]));
    let stack = build_stack(
        &settings,
        transport,
        default_queue_config(),
        Duration::from_millis(400),
        Duration::from_millis(100),
    );

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    // The slow platform is timed out, not failed; fast platforms still
    // produce the merged record.
    assert_eq!(
        report.platform("slowsite").unwrap().outcome,
        PlatformOutcome::TimedOut
    );
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.platform("ticketmax").unwrap().outcome,
        PlatformOutcome::Ok
    );
}

#[tokio::test]
async fn disabled_platform_is_not_scheduled() {
    let transport = Arc::new(StubTransport::new(vec![
        StubRoute {
            needle: "ticketmax.test",
            delay: Duration::ZERO,
            status: 200,
            body: listing_html("$50.00"),
        },
        StubRoute {
            needle: "seatgrab.test",
            delay: Duration::ZERO,
            status: 200,
            body: seatgrab_json(55.0),
        },
    ]));
    let stack = build_stack(
        BASE_SETTINGS,
        transport.clone(),
        default_queue_config(),
        Duration::from_secs(10),
        Duration::from_millis(100),
    );
    stack.registry.disable("seatgrab").unwrap();

    let report = stack
        .orchestrator
        .scrape_all(&SearchCriteria::for_query("team x"))
        .await;

    assert!(report.platform("seatgrab").is_none());
    assert_eq!(report.platforms.len(), 1);
    assert_eq!(transport.calls(), 1);
}
